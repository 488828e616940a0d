fn main() {
    #[cfg(feature = "cli")]
    rezip::cli::run();

    #[cfg(not(feature = "cli"))]
    {
        eprintln!("rezip: CLI not enabled. Rebuild with `--features cli`.");
        std::process::exit(1);
    }
}
