use std::error::Error;
use std::path::PathBuf;

use webarchive_wacz::open_wacz;
use webarchive_warc::transform::response_from_warc;

#[derive(clap::Args, Debug)]
pub(crate) struct InspectArgs {
    #[arg(help = "WACZ to open (path, file://, s3:// or http(s)://)")]
    wacz: String,
    #[arg(short, long, help = "look up one URL instead of listing the index")]
    url: Option<String>,
    #[arg(long, help = "crawl settings file (toml)")]
    config: Option<PathBuf>,
}

pub(crate) fn run(args: InspectArgs) -> Result<(), Box<dyn Error>> {
    let settings = crate::load_settings(args.config.as_deref())?;
    let wacz = open_wacz(&args.wacz, &settings)?;

    let Some(url) = args.url else {
        for entry in wacz.iter_index() {
            println!("{}", entry.to_line());
        }
        return Ok(());
    };

    let Some(record) = wacz.record_for_url(&url)? else {
        eprintln!("no record for {url}");
        std::process::exit(1);
    };

    for (name, value) in record.headers() {
        println!("{name}: {value}");
    }

    if let Some(response) = response_from_warc(&record)? {
        println!();
        println!(
            "decoded response: {} ({} body bytes)",
            response.status,
            response.body.len()
        );
    }

    Ok(())
}
