use std::error::Error;
use std::path::PathBuf;

use webarchive_wacz::{store_for_uri, WaczPackager};

#[derive(clap::Args, Debug)]
pub(crate) struct ExportArgs {
    #[arg(short, long, help = "finished WARC to package (consumed on success)")]
    warc: PathBuf,
    #[arg(short, long, help = "collection name recorded in the package")]
    collection: String,
    #[arg(
        short,
        long,
        help = "output directory or explicit .wacz target (path, file:// or s3://)"
    )]
    output: String,
    #[arg(long, help = "crawl settings file (toml)")]
    config: Option<PathBuf>,
    #[arg(long, help = "datapackage title")]
    title: Option<String>,
    #[arg(long, help = "datapackage description")]
    description: Option<String>,
}

pub(crate) fn run(args: ExportArgs) -> Result<(), Box<dyn Error>> {
    let settings = crate::load_settings(args.config.as_deref())?;
    let (store, explicit_fname) = store_for_uri(&args.output, &settings)?;

    let uri = WaczPackager::new(
        store.as_ref(),
        &args.warc,
        &args.collection,
        args.title.or(settings.wacz_title),
        args.description.or(settings.wacz_description),
        explicit_fname,
    )
    .create()?;

    println!("{uri}");

    Ok(())
}
