/*!
Pick a city and print its synthetic pollutant series as CSV
*/
use airburn::data::{archive::write_records, cities, DataSource};
use airburn::Config;
use rustyline::error::ReadlineError;
use rustyline::Editor;
use std::io::stdout;

fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let synthesizer = config.synthesizer();
    let all = cities::all();
    for city in &all {
        eprintln!("{}. {}", city.key, city.name);
    }
    let mut rl = Editor::<()>::new();
    let city = loop {
        match rl.readline("City: ") {
            Ok(line) => match cities::lookup(&line) {
                Some(city) => break city,
                None => eprintln!("Unknown city: {:?}", line),
            },
            Err(ReadlineError::Interrupted) => {
                eprintln!("CTRL-C");
                return Ok(());
            }
            Err(ReadlineError::Eof) => {
                eprintln!("CTRL-D");
                return Ok(());
            }
            Err(err) => eprintln!("Error: {:?}", err),
        }
    };
    let series = synthesizer.generate_today(&DataSource::Synthetic(city));
    let written = write_records(stdout(), &series.records)?;
    eprintln!("{}: {} days", series.city, written);
    Ok(())
}
