/*!
CSV archives of daily pollutant records
*/
use super::{Record, SourceKind, TimeSeries};
use crate::Result;
use chrono::NaiveDate;
use std::io::{Read, Write};
use std::str::FromStr;

/// The archive date format
pub const ARCHIVE_DATE: &str = "%Y-%m-%d";

/// Read positional `date,pm25,no2[,wind_speed,humidity,temperature]` rows with a custom date format,
/// skipping rows whose date or pollutant values do not parse
pub fn read_table<R: Read>(rdr: R, date_format: &str) -> Vec<Record> {
    csv::Reader::from_reader(rdr)
        .into_records()
        .filter_map(|result| {
            let row = result.ok()?;
            let mut row = row.iter();
            let date = NaiveDate::parse_from_str(row.next()?.trim(), date_format).ok()?;
            let pm25 = f64::from_str(row.next()?.trim()).ok()?;
            let no2 = f64::from_str(row.next()?.trim()).ok()?;
            let mut record = Record::new(date, pm25, no2);
            let mut optional = row.map(|field| f64::from_str(field.trim()).ok());
            record.wind_speed = optional.next().flatten();
            record.humidity = optional.next().flatten();
            record.temperature = optional.next().flatten();
            Some(record)
        })
        .collect()
}

/// Deserialize records written by [`write_records`]
pub fn deserialize_records<R: Read>(rdr: R) -> impl Iterator<Item = Result<Record, csv::Error>> {
    csv::Reader::from_reader(rdr).into_deserialize()
}

/// Read an archived series for a city, checking date continuity and value ranges
pub fn read_series<R: Read>(rdr: R, city: &str) -> Result<TimeSeries> {
    let records = deserialize_records(rdr).collect::<Result<Vec<_>, _>>()?;
    let series = TimeSeries {
        city: city.to_string(),
        source: SourceKind::Archived,
        records,
    };
    series.check()?;
    tracing::debug!(city, days = series.len(), "read archived series");
    Ok(series)
}

/// Write records to a Writer
/// On success, return how many records were written
pub fn write_records<'a, W, I>(wtr: W, records: I) -> Result<usize, csv::Error>
where
    W: Write,
    I: IntoIterator<Item = &'a Record>,
{
    let mut wtr = csv::Writer::from_writer(wtr);
    let mut written = 0;
    for record in records {
        wtr.serialize(record)?;
        written += 1;
    }
    wtr.flush()?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lenient_table() {
        let table = "\
day,pm,no2,wind,hum,temp
01/05/2024,12.5,30.1,,60,21.5
02/05/2024,oops,30.1
03/05/2024,14.0,29.0
";
        let records = read_table(table.as_bytes(), "%d/%m/%Y");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].pm25, 12.5);
        assert_eq!(records[0].wind_speed, None);
        assert_eq!(records[0].humidity, Some(60.0));
        assert_eq!(records[0].temperature, Some(21.5));
        assert_eq!(records[1].date, NaiveDate::from_ymd_opt(2024, 5, 3).unwrap());
        assert_eq!(records[1].humidity, None);
    }

    #[test]
    fn archived_series_is_checked() {
        let gap = "\
date,pm25,no2,wind_speed,humidity,temperature
2024-05-01,12.5,30.1,,,
2024-05-03,14.0,29.0,,,
";
        assert!(read_series(gap.as_bytes(), "Test").is_err());
        let ok = "\
date,pm25,no2,wind_speed,humidity,temperature
2024-05-01,12.5,30.1,,,
2024-05-02,14.0,29.0,3.5,,
";
        let series = read_series(ok.as_bytes(), "Test").unwrap();
        assert_eq!(series.source, SourceKind::Archived);
        assert_eq!(series.records[1].wind_speed, Some(3.5));
    }
}
