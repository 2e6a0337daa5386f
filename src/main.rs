fn main() {
    if let Err(e) = tutorlog_lib::run() {
        tracing::error!(error = %e, "Batch failed");
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
