//! Classification and normalization of free-form location input.
//!
//! Patterns are tried in a fixed order and the first match wins:
//! ZIP, then coordinates, then `City, REGION`, with free text falling
//! back to a landmark. Numeric pairs never fall through to the city
//! pattern: an out-of-range pair is an error.

use std::sync::LazyLock;

use regex::Regex;

use crate::{
    error::{ValidationReason, WeatherError, WeatherResult},
    model::{LocationKind, NormalizedLocation},
};

static ZIP_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{5}(?:-\d{4})?$").expect("ZIP pattern is valid"));

static COORDINATES_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([+-]?\d+(?:\.\d+)?)\s*,\s*([+-]?\d+(?:\.\d+)?)$")
        .expect("coordinates pattern is valid")
});

static CITY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([\w\s]+?)\s*,\s*([A-Za-z]{2,})$").expect("city pattern is valid")
});

pub struct LocationParser;

impl LocationParser {
    pub fn classify(raw: &str) -> WeatherResult<NormalizedLocation> {
        let input = raw.trim();
        if input.is_empty() {
            return Err(WeatherError::validation(
                ValidationReason::EmptyInput,
                "location is blank",
            ));
        }

        if ZIP_PATTERN.is_match(input) {
            return Ok(located(raw, LocationKind::Zip, input.to_string()));
        }

        if let Some(caps) = COORDINATES_PATTERN.captures(input) {
            let latitude = parse_coordinate(&caps[1])?;
            let longitude = parse_coordinate(&caps[2])?;
            check_coordinates(latitude, longitude)?;

            let normalized = format!("{latitude:.4},{longitude:.4}");
            let location = located(raw, LocationKind::Coordinates, normalized);
            return Ok(location.with_coordinates(latitude, longitude));
        }

        if let Some(caps) = CITY_PATTERN.captures(input) {
            let city = title_case(&caps[1]);
            let region = normalize_region(&caps[2]);
            if !city.is_empty() {
                return Ok(located(raw, LocationKind::City, format!("{city}, {region}")));
            }
        }

        let landmark = input.split_whitespace().collect::<Vec<_>>().join(" ");
        Ok(located(raw, LocationKind::Landmark, landmark))
    }
}

fn located(raw: &str, kind: LocationKind, normalized_value: String) -> NormalizedLocation {
    NormalizedLocation {
        raw_input: raw.to_string(),
        kind,
        normalized_value,
        latitude: None,
        longitude: None,
    }
}

fn parse_coordinate(text: &str) -> WeatherResult<f64> {
    text.parse::<f64>().map_err(|e| {
        WeatherError::validation(
            ValidationReason::CoordinatesOutOfRange,
            format!("'{text}' is not a coordinate: {e}"),
        )
    })
}

fn check_coordinates(latitude: f64, longitude: f64) -> WeatherResult<()> {
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(WeatherError::validation(
            ValidationReason::CoordinatesOutOfRange,
            format!("latitude {latitude} is outside -90..90"),
        ));
    }
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(WeatherError::validation(
            ValidationReason::CoordinatesOutOfRange,
            format!("longitude {longitude} is outside -180..180"),
        ));
    }
    Ok(())
}

fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Short region codes ("us", "gb", "nsw") are upper-cased, names are title-cased.
fn normalize_region(region: &str) -> String {
    if region.len() <= 3 {
        region.to_ascii_uppercase()
    } else {
        title_case(region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(input: &str) -> NormalizedLocation {
        LocationParser::classify(input).expect("input should classify")
    }

    fn reason(input: &str) -> ValidationReason {
        LocationParser::classify(input)
            .unwrap_err()
            .reason()
            .expect("validation error")
    }

    #[test]
    fn five_digit_strings_are_zip_codes() {
        for zip in ["00000", "10001", "90210", "99999"] {
            let loc = classify(zip);
            assert_eq!(loc.kind, LocationKind::Zip);
            assert_eq!(loc.normalized_value, zip);
            assert_eq!(loc.coordinates(), None);
        }
    }

    #[test]
    fn zip_plus_four_is_zip() {
        let loc = classify("99999-1234");
        assert_eq!(loc.kind, LocationKind::Zip);
        assert_eq!(loc.normalized_value, "99999-1234");
    }

    #[test]
    fn coordinate_pair_is_parsed() {
        let loc = classify("40.7128, -74.0060");
        assert_eq!(loc.kind, LocationKind::Coordinates);
        let (lat, lon) = loc.coordinates().expect("coordinates populated");
        assert!((lat - 40.7128).abs() < 1e-9);
        assert!((lon - -74.0060).abs() < 1e-9);
        assert_eq!(loc.normalized_value, "40.7128,-74.0060");
    }

    #[test]
    fn coordinates_out_of_range_fail() {
        assert_eq!(reason("91.0,0.0"), ValidationReason::CoordinatesOutOfRange);
        assert_eq!(reason("0.0, 180.5"), ValidationReason::CoordinatesOutOfRange);
        assert_eq!(reason("-90.1,10"), ValidationReason::CoordinatesOutOfRange);
    }

    #[test]
    fn coordinate_edges_are_accepted() {
        let loc = classify("-90,180");
        assert_eq!(loc.kind, LocationKind::Coordinates);
        assert_eq!(loc.normalized_value, "-90.0000,180.0000");
    }

    #[test]
    fn city_with_region_is_title_cased() {
        let loc = classify("  new york,us ");
        assert_eq!(loc.kind, LocationKind::City);
        assert_eq!(loc.normalized_value, "New York, US");
        assert_eq!(loc.raw_input, "  new york,us ");
    }

    #[test]
    fn city_with_country_name() {
        let loc = classify("paris, france");
        assert_eq!(loc.kind, LocationKind::City);
        assert_eq!(loc.normalized_value, "Paris, France");
    }

    #[test]
    fn free_text_falls_back_to_landmark() {
        let loc = classify("Eiffel   Tower");
        assert_eq!(loc.kind, LocationKind::Landmark);
        assert_eq!(loc.normalized_value, "Eiffel Tower");

        let loc = classify("St. Louis, MO");
        assert_eq!(loc.kind, LocationKind::Landmark);
    }

    #[test]
    fn short_numbers_are_not_zip_codes() {
        assert_eq!(classify("1234").kind, LocationKind::Landmark);
        assert_eq!(classify("123456").kind, LocationKind::Landmark);
    }

    #[test]
    fn blank_input_is_rejected() {
        assert_eq!(reason(""), ValidationReason::EmptyInput);
        assert_eq!(reason("   \t"), ValidationReason::EmptyInput);
    }
}
