use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const DEFAULT_LOADER_NAME: &str = "io/satellite/Loader";

fn main() {
    println!("cargo:rerun-if-env-changed=SATELLITE_LOADER_CLASS");
    println!("cargo:rerun-if-env-changed=SATELLITE_LOADER_NAME");
    println!("cargo:rerun-if-env-changed=SATELLITE_ARCHIVE");

    let out = PathBuf::from(env::var("OUT_DIR").expect("cargo sets OUT_DIR"));
    let mut f = fs::File::create(out.join("embedded_resources.rs"))
        .expect("embedded resources file can be created");

    let name = env::var("SATELLITE_LOADER_NAME").unwrap_or_else(|_| DEFAULT_LOADER_NAME.to_owned());
    writeln!(f, "pub const LOADER_CLASS_NAME: &str = {:?};", name).unwrap();
    let class = blob("SATELLITE_LOADER_CLASS");
    writeln!(f, "pub static LOADER_CLASS: Option<&[u8]> = {};", class).unwrap();
    writeln!(f, "pub static ARCHIVE: Option<&[u8]> = {};", blob("SATELLITE_ARCHIVE")).unwrap();
}

fn blob(var: &str) -> String {
    match env::var_os(var) {
        Some(path) => {
            let path = Path::new(&path)
                .canonicalize()
                .unwrap_or_else(|e| panic!("{} does not name a readable file: {}", var, e));
            println!("cargo:rerun-if-changed={}", path.display());
            format!("Some(include_bytes!({:?}) as &[u8])", path)
        }
        None => {
            println!("cargo:warning={} is not set; the daemon will refuse to start", var);
            "None".to_owned()
        }
    }
}
