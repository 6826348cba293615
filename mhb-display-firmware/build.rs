fn main() {
    let target = std::env::var("TARGET").unwrap_or_default();
    // host builds only run the library tests and must not see the linker scripts
    if target.starts_with("thumbv7m") {
        println!("cargo:rustc-link-arg-bins=--nmagic");
        println!("cargo:rustc-link-arg-bins=-Tlink.x");
        println!("cargo:rustc-link-arg-bins=-Tdefmt.x");
    }
    println!("cargo:rerun-if-changed=build.rs");
}
