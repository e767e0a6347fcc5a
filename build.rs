//! Build script for evalpool-rs.
//!
//! Links the C evaluation bridge when the `native` feature is enabled.
//! Without the feature there is nothing to do.
//!
//! # Environment Variables
//!
//! - `EVALBRIDGE_LIB_DIR`: Directory containing `libevalbridge` (required
//!   with `native`).
//! - `EVALBRIDGE_LIB_NAME`: Library name to link (default: `evalbridge`).
//! - `EVALBRIDGE_STATIC`: Set to "1" to link statically.

use std::env;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=EVALBRIDGE_LIB_DIR");
    println!("cargo:rerun-if-env-changed=EVALBRIDGE_LIB_NAME");
    println!("cargo:rerun-if-env-changed=EVALBRIDGE_STATIC");

    if env::var_os("CARGO_FEATURE_NATIVE").is_none() {
        return;
    }
    link_eval_bridge();
}

fn link_eval_bridge() {
    let lib_name = env::var("EVALBRIDGE_LIB_NAME").unwrap_or_else(|_| "evalbridge".to_string());
    let kind = if env::var("EVALBRIDGE_STATIC").as_deref() == Ok("1") {
        "static"
    } else {
        "dylib"
    };

    match env::var("EVALBRIDGE_LIB_DIR") {
        Ok(dir) => {
            let lib_dir = PathBuf::from(dir);
            if !lib_dir.is_dir() {
                panic!(
                    "EVALBRIDGE_LIB_DIR={} is not a directory.\n\
                     Point it at the directory containing lib{}.",
                    lib_dir.display(),
                    lib_name
                );
            }
            println!("cargo:rustc-link-search=native={}", lib_dir.display());
            let target_linux = env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("linux");
            if kind == "dylib" && target_linux {
                // Find the bridge at runtime without LD_LIBRARY_PATH.
                println!("cargo:rustc-link-arg=-Wl,-rpath,{}", lib_dir.display());
            }
        }
        Err(_) => {
            println!(
                "cargo:warning=EVALBRIDGE_LIB_DIR not set; relying on the system linker path to find lib{}",
                lib_name
            );
        }
    }

    println!("cargo:rustc-link-lib={}={}", kind, lib_name);
}
