fn main() {
    match rschroot::cli::run() {
        Ok(status) => std::process::exit(status),
        Err(e) => {
            eprintln!("rschroot: {:#}", e);
            std::process::exit(1);
        }
    }
}
