fn main() {
    if let Err(e) = phenomap_lib::run() {
        eprintln!("phenomap: {e}");
        std::process::exit(1);
    }
}
