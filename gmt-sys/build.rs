// Build script for gmt-sys.
//
// Without the `link` feature nothing is generated: the crate only exposes the
// stable constants in `consts`. With `link`:
//   1. Locate the GMT headers and library, either from GMT_INCLUDE_DIR /
//      GMT_LIB_DIR or by asking `gmt-config`.
//   2. Emit the link directives for libgmt.
//   3. Run `bindgen` on `wrapper.h` to produce `bindings.rs`.

fn main() {
    println!("cargo:rerun-if-changed=wrapper.h");
    println!("cargo:rerun-if-env-changed=GMT_INCLUDE_DIR");
    println!("cargo:rerun-if-env-changed=GMT_LIB_DIR");

    #[cfg(feature = "link")]
    link::run();
}

#[cfg(feature = "link")]
mod link {
    use std::env;
    use std::path::PathBuf;
    use std::process::Command;

    pub fn run() {
        let manifest = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
        let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());

        // Phase 1: locate GMT
        let include_dir = env::var("GMT_INCLUDE_DIR")
            .ok()
            .or_else(|| gmt_config("--cflags").and_then(|s| strip_flag(&s, "-I")))
            .expect("GMT headers not found: set GMT_INCLUDE_DIR or put gmt-config on PATH");
        let lib_dir = env::var("GMT_LIB_DIR")
            .ok()
            .or_else(|| gmt_config("--libs").and_then(|s| strip_flag(&s, "-L")));

        // Phase 2: link directives
        if let Some(dir) = &lib_dir {
            println!("cargo:rustc-link-search=native={dir}");
        }
        println!("cargo:rustc-link-lib=dylib=gmt");

        // Phase 3: bindings
        let bindings = bindgen::Builder::default()
            .header(manifest.join("wrapper.h").to_str().unwrap())
            .clang_arg(format!("-I{include_dir}"))
            .parse_callbacks(Box::new(bindgen::CargoCallbacks::new()))
            .allowlist_function("GMT_.*")
            .allowlist_type("GMT_.*")
            .allowlist_var("GMT_.*")
            .prepend_enum_name(false)
            .generate()
            .expect("bindgen failed");

        bindings
            .write_to_file(out_dir.join("bindings.rs"))
            .expect("failed to write bindings.rs");
    }

    /// Run `gmt-config <flag>` and return its trimmed stdout.
    fn gmt_config(flag: &str) -> Option<String> {
        let output = Command::new("gmt-config").arg(flag).output().ok()?;
        if !output.status.success() {
            return None;
        }
        Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Pick the first `-I`/`-L` argument out of a compiler flag string.
    fn strip_flag(flags: &str, prefix: &str) -> Option<String> {
        flags
            .split_whitespace()
            .find_map(|f| f.strip_prefix(prefix).map(str::to_string))
    }
}
