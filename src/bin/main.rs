use clap::{value_parser, Arg, ArgAction, ValueHint};
use kvarn_harness::prelude::*;

const ABOUT: &str = "\nRun a program against the fixture server.\n\
\n\
A plain and a TLS listener are started on ephemeral localhost ports. \
The program learns about them through the `TEST_HTTP_BASE` and `TEST_HTTPS_BASE` \
environment variables.\n\
Use the `KVARN_HARNESS_LOG` environment variable to override the log filter.\n\
\n\
The exit status is the program's, 1 if it timed out or was killed by a signal, \
and 2 for errors of the harness itself.";

const HARNESS_ERROR: i32 = 2;

#[tokio::main]
async fn main() {
    let mut command = clap::command!();
    command = command
        .about(ABOUT)
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .help("Increase verbosity of logs (repeat for more). At -vvv, output is echoed."),
        )
        .arg(
            Arg::new("root")
                .long("root")
                .value_name("DIR")
                .value_hint(ValueHint::DirPath)
                .value_parser(value_parser!(PathBuf))
                .default_value("lib/www")
                .help("The directory of fixtures to serve"),
        )
        .arg(
            Arg::new("cert")
                .long("cert")
                .value_name("PEM")
                .value_hint(ValueHint::FilePath)
                .value_parser(value_parser!(PathBuf))
                .default_value("lib/certs/https-snakeoil.crt")
                .help("The certificate chain of the TLS listener"),
        )
        .arg(
            Arg::new("key")
                .long("key")
                .value_name("PEM")
                .value_hint(ValueHint::FilePath)
                .value_parser(value_parser!(PathBuf))
                .default_value("lib/certs/https-snakeoil.key")
                .help("The private key of the TLS listener"),
        )
        .arg(
            Arg::new("timeout")
                .short('t')
                .long("timeout")
                .value_name("SECS")
                .value_parser(value_parser!(f64))
                .default_value("30")
                .help("Terminate the program after this many seconds"),
        )
        .arg(
            Arg::new("stdin")
                .long("stdin")
                .value_name("FILE")
                .value_hint(ValueHint::FilePath)
                .value_parser(value_parser!(PathBuf))
                .help("Write the contents of FILE to the program's stdin"),
        )
        .arg(
            Arg::new("debugger")
                .long("debugger")
                .value_name("DEBUGGER")
                .value_hint(ValueHint::CommandString)
                .help("Run the program under DEBUGGER, e.g. \"gdb --args\""),
        )
        .arg(
            Arg::new("program")
                .required(true)
                .num_args(1)
                .value_name("PROGRAM")
                .value_hint(ValueHint::CommandName),
        )
        .arg(
            Arg::new("args")
                .value_name("ARGUMENTS")
                .num_args(..)
                .trailing_var_arg(true)
                .allow_hyphen_values(true)
                .value_hint(ValueHint::Other),
        );

    let matches = command.get_matches();

    let verbosity = Verbosity(matches.get_count("verbose"));
    let filter = match verbosity.0 {
        0 => "warn",
        1..=3 => "info,rustls=warn",
        _ => "debug,rustls=info",
    };
    env_logger::Builder::from_env(env_logger::Env::new().filter_or("KVARN_HARNESS_LOG", filter))
        .format_timestamp(None)
        .init();

    let code = match run(&matches, verbosity).await {
        Ok(code) => code,
        Err(err) => {
            error!("{err}");
            HARNESS_ERROR
        }
    };
    std::process::exit(code);
}

async fn run(matches: &clap::ArgMatches, verbosity: Verbosity) -> Result<i32, Error> {
    let path = |name: &str| {
        matches
            .get_one::<PathBuf>(name)
            .expect("argument has a default value")
    };
    let tls = TlsMaterial::from_pem_files(path("cert"), path("key"))?;
    let config = ServerConfig::builder(path("root"), tls)
        .verbosity(verbosity)
        .build();
    let server = Server::new(config).start().await?;

    let mut spec = ProcessSpec::new(
        matches
            .get_one::<String>("program")
            .expect("argument is required"),
    )
    .envs(server.environment());
    if let Some(args) = matches.get_many::<String>("args") {
        spec = spec.args(args);
    }
    if let Some(debugger) = matches.get_one::<String>("debugger") {
        spec = spec.under(debugger.split_whitespace());
    }
    if let Some(timeout) = matches.get_one::<f64>("timeout") {
        let timeout = Duration::try_from_secs_f64(*timeout).map_err(|err| {
            Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid timeout: {err}"),
            ))
        })?;
        spec = spec.timeout(timeout);
    }
    if let Some(stdin) = matches.get_one::<PathBuf>("stdin") {
        spec = spec.input(tokio::fs::read(stdin).await?);
    }

    let result = ProcessRunner::new().verbosity(verbosity).run(spec).await;
    server.shutdown().await;
    let result = result?;

    // At `-vvv`, the lines were logged as they arrived.
    if !verbosity.echoes() {
        for line in &result.stdout {
            println!("{line}");
        }
        for line in &result.stderr {
            eprintln!("{line}");
        }
    }

    Ok(match result.status {
        _ if result.timed_out => 1,
        ExitStatus::Code(code) => code,
        ExitStatus::Signal(_) => 1,
    })
}
