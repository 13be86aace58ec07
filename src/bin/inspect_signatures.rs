//! Signature inspector
//!
//! Reads and verifies every signature of an ODF or OOXML package and prints
//! the results as JSON.
//!
//! Usage: inspect_signatures <package> [--summary]
//!
//! Set `DOCSIG_TEST_MODE` to classify every entry as XML.

use docsig_oxide::config::SignatureConfig;
use docsig_oxide::package::MemoryPackage;
use docsig_oxide::signatures::DocumentSignatureManager;
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

struct InspectConfig {
    path: PathBuf,
    summary: bool,
}

impl InspectConfig {
    fn from_args() -> Option<Self> {
        let mut path = None;
        let mut summary = false;
        for arg in std::env::args().skip(1) {
            match arg.as_str() {
                "--summary" | "-s" => summary = true,
                _ => path = Some(PathBuf::from(arg)),
            }
        }
        path.map(|path| Self { path, summary })
    }
}

fn inspect(config: &InspectConfig) -> docsig_oxide::Result<String> {
    let package = Rc::new(RefCell::new(MemoryPackage::open(&config.path)?));
    let mut manager = DocumentSignatureManager::new(package, SignatureConfig::from_env());
    manager.load_manifest()?;
    manager.read(false, true)?;
    log::info!(
        "{}: {} package with {} signatures",
        config.path.display(),
        manager.format().as_str(),
        manager.signatures().len()
    );

    let json = if config.summary {
        let rows: Vec<serde_json::Value> = manager
            .signatures()
            .iter()
            .map(|s| {
                serde_json::json!({
                    "issuer": s.issuer_name,
                    "serial": s.serial_number,
                    "date": s.date_time,
                    "status": s.status,
                })
            })
            .collect();
        serde_json::to_string_pretty(&rows)
    } else {
        serde_json::to_string_pretty(manager.signatures())
    };
    json.map_err(|e| docsig_oxide::Error::Encoding(e.to_string()))
}

fn main() {
    env_logger::init();

    let Some(config) = InspectConfig::from_args() else {
        eprintln!("Usage: inspect_signatures <package> [--summary]");
        std::process::exit(2);
    };

    match inspect(&config) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Failed to inspect {}: {}", config.path.display(), e);
            std::process::exit(1);
        },
    }
}
