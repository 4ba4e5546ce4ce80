/*!
Load a pollutant series and standardize it
*/
use airburn::data::{archive, scale::Normalizer, Record, SourceKind, TimeSeries};
use clap::{App, Arg};
use io_enum::*;
use std::fs::File;
use std::io::{stdin, Stdin};
use std::path::Path;

#[derive(Debug, Read)]
pub enum IoSources {
    Stdin(Stdin),
    File(File),
}

fn main() -> anyhow::Result<()> {
    let matches = App::new("Pollutant Data Scaler")
        .version("1.0")
        .about("Loads a pollutant series from a file or stdin and standardizes its model features")
        .arg(
            Arg::with_name("INPUT")
                .help("Sets the input file to use")
                .index(1),
        )
        .arg(
            Arg::with_name("date-format")
                .short("f")
                .long("date-format")
                .help("Read positional date,pm25,no2 rows with this date format, skipping bad rows")
                .takes_value(true),
        )
        .get_matches();
    let reader = if let Some(path) = matches.value_of("INPUT") {
        IoSources::File(File::open(Path::new(path))?)
    } else {
        IoSources::Stdin(stdin())
    };
    let records = match matches.value_of("date-format") {
        Some(format) => archive::read_table(reader, format),
        None => archive::deserialize_records(reader).collect::<Result<Vec<_>, _>>()?,
    };
    let series = TimeSeries {
        city: matches.value_of("INPUT").unwrap_or("stdin").to_string(),
        source: SourceKind::Archived,
        records,
    };
    if series.is_empty() {
        return Ok(());
    }
    let (normalizer, normalized) = Normalizer::fit_transform(&series)?;
    for (name, column) in Record::FEATURES.iter().zip(&normalizer.columns) {
        println!("{}: mean = {:.3}, std = {:.3}", name, column.mean, column.std);
    }
    for (i, record) in series.records.iter().enumerate() {
        let row = normalized.row(i);
        println!("{} {:>8.4} {:>8.4}", record.date, row[0], row[1]);
    }
    Ok(())
}
