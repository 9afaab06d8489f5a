fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    #[cfg(feature = "cli")]
    {
        use commons_dl::cli::{Command, parse_args, print_usage, run};

        let args = match parse_args(std::env::args().skip(1)) {
            Ok(Command::Run(args)) => args,
            Ok(Command::Help) => {
                print_usage();
                std::process::exit(0);
            }
            Err(e) => {
                eprintln!("Error: {e}");
                print_usage();
                std::process::exit(2);
            }
        };
        if let Err(e) = run(&args) {
            log::error!("{e}");
            std::process::exit(1);
        }
    }

    #[cfg(not(feature = "cli"))]
    {
        eprintln!("CLI support not compiled in");
        std::process::exit(1);
    }
}
