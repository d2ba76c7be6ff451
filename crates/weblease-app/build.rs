use std::fs;
use std::path::PathBuf;

fn main() {
    let manifest_dir = PathBuf::from(std::env::var("CARGO_MANIFEST_DIR").expect("manifest dir"));
    let version_path = manifest_dir
        .parent()
        .expect("crates dir")
        .parent()
        .expect("workspace root")
        .join("VERSION");

    println!("cargo:rerun-if-changed={}", version_path.display());

    let version = match fs::read_to_string(&version_path) {
        Ok(raw) if !raw.trim().is_empty() => raw.trim().to_string(),
        _ => {
            println!("cargo:warning=VERSION file missing or empty; using placeholder version");
            "0.0.0-unknown".to_string()
        }
    };

    println!("cargo:rustc-env=WEBLEASE_VERSION={version}");
}
