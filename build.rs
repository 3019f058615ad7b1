//! Build script.
//!
//! Recompiles the crate when migration files change, which the `SQLx`
//! `migrate!()` macro needs to pick up schema updates.

fn main() {
    println!("cargo:rerun-if-changed=migrations");
}
