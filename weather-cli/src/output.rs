//! Human-readable rendering of lookups and history entries.

use weather_core::{QueryOutcome, Units, WeatherRecord};

pub fn print_outcome(outcome: &QueryOutcome, units: Units) {
    let record = &outcome.record;

    println!("{} ({})", outcome.location.normalized_value, outcome.location.kind);
    if let Some((lat, lon)) = outcome.location.coordinates() {
        println!("  coordinates: {lat:.4}, {lon:.4}");
    }
    println!("  dates:       {}", record.date_range);

    match &outcome.current {
        Some(current) => {
            println!(
                "  now:         {}, {} (feels like {})",
                units.format_temperature(current.temperature_c),
                current.description,
                units.format_temperature(current.feels_like_c)
            );
            println!(
                "  humidity:    {}%  wind: {:.1} m/s  [{}]",
                current.humidity_pct, current.wind_speed_mps, current.provider
            );
        }
        None => {
            println!(
                "  last known:  {}, {}",
                units.format_temperature(record.temperature),
                record.weather_conditions
            );
            println!("  (weather service unavailable; showing stored data)");
        }
    }
    println!("  saved as #{}", record.id);

    if let Some(days) = &outcome.forecast {
        println!();
        println!("Forecast:");
        for day in days {
            println!(
                "  {}  {} / {}  {:<20} rain {:>3.0}%",
                day.date,
                units.format_temperature(day.temp_min_c),
                units.format_temperature(day.temp_max_c),
                day.condition,
                day.precipitation_prob * 100.0
            );
        }
    }

    if let Some(videos) = &outcome.videos {
        println!();
        println!("Travel videos:");
        if videos.is_empty() {
            println!("  none found");
        }
        for video in videos {
            println!("  {}  {}", video.title, video.url);
        }
    }

    if let Some(url) = &outcome.map_url {
        println!();
        println!("Map: {url}");
    }
}

pub fn record_line(record: &WeatherRecord, units: Units) -> String {
    let source = if record.from_cache {
        "  [stored data]"
    } else {
        ""
    };
    format!(
        "#{:<5} {:<28} {:<9} {:<24} {:>9}  {}{source}",
        record.id,
        record.location,
        record.location_type.as_str(),
        record.date_range.to_string(),
        units.format_temperature(record.temperature),
        record.weather_conditions
    )
}

pub fn print_records(records: &[WeatherRecord], units: Units) {
    if records.is_empty() {
        println!("No history yet.");
        return;
    }
    for record in records {
        println!("{}", record_line(record, units));
    }
}

pub fn print_record(record: &WeatherRecord, units: Units) {
    println!("#{}", record.id);
    println!("  location:    {} ({})", record.location, record.location_type);
    println!("  dates:       {}", record.date_range);
    println!("  temperature: {}", units.format_temperature(record.temperature));
    println!("  conditions:  {}", record.weather_conditions);
    if record.from_cache {
        println!("  source:      stored data (weather service was unavailable)");
    }
    println!("  created:     {}", record.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("  updated:     {}", record.updated_at.format("%Y-%m-%d %H:%M:%S UTC"));
}
