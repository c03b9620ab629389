// build.rs - stamps the build date into build_info.rs for the start-up log

use chrono::Utc;
use std::env;
use std::fs;
use std::io;
use std::path::Path;

fn main() -> io::Result<()> {
    let out_dir = env::var("OUT_DIR").map_err(io::Error::other)?;
    let dest_path = Path::new(&out_dir).join("build_info.rs");

    let build_date = Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();
    fs::write(&dest_path, format!("pub const BUILD_DATE: &str = \"{}\";\n", build_date))?;

    // only re-stamp when the script itself changes
    println!("cargo:rerun-if-changed=build.rs");
    Ok(())
}
