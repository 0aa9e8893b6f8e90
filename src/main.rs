//! Evochora executable entry point.

fn main() {
    let code = evochora_bin::run_app();
    std::process::exit(code);
}
