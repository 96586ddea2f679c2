//! ---
//! mp_section: "06-daemon"
//! mp_subsection: "binary"
//! mp_type: "source"
//! mp_scope: "code"
//! mp_description: "Build script emitting version metadata for the daemon."
//! mp_version: "v0.0.0-prealpha"
//! mp_owner: "tbd"
//! ---
use vergen::EmitBuilder;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Git metadata is optional; source tarballs build without it.
    EmitBuilder::builder()
        .all_build()
        .all_cargo()
        .all_git()
        .emit()?;
    println!("cargo:rerun-if-changed=build.rs");
    Ok(())
}
