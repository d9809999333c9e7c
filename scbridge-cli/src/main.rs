use std::fs::File;
use std::path::Path;
use std::process;
use std::thread;
use std::time::Duration;

use scbridge_core::bridge::{Bridge, BridgeError};
use scbridge_core::config::{config_dir, normalize_prefix, Config};
use scbridge_core::engine::EngineProcess;

/// How long a freshly spawned scsynth gets before we start sending to it.
const ENGINE_BOOT_WAIT: Duration = Duration::from_millis(1500);

const USAGE: &str = "\
usage: scbridge [options]

  --port <n>             listen for the controller on this UDP port
  --engine <host:port>   scsynth address (default 127.0.0.1:57110)
  --coordinator <addr>   send the port handshake and compile acks here
  --prefix <path>        prefix for instrument channels, e.g. /scamp
  --config <file>        read this config file instead of the user one
  --spawn-engine         start scsynth on the engine port
  -v, --verbose          debug logging
  -h, --help             show this help";

fn init_logging(verbose: bool) {
    use simplelog::{
        ColorChoice, CombinedLogger, LevelFilter, SharedLogger, TermLogger, TerminalMode, WriteLogger,
    };

    let log_level = if verbose { LevelFilter::Debug } else { LevelFilter::Info };
    let log_path = config_dir().join("scbridge.log");
    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        log_level,
        simplelog::Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )];
    match File::create(&log_path) {
        Ok(file) => loggers.push(WriteLogger::new(log_level, simplelog::Config::default(), file)),
        Err(e) => eprintln!("scbridge: cannot write {}: {}", log_path.display(), e),
    }
    if CombinedLogger::init(loggers).is_err() {
        eprintln!("scbridge: logger already initialized");
    }

    log::info!("scbridge starting (log level: {:?})", log_level);
}

fn arg_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn fail(message: impl std::fmt::Display, code: i32) -> ! {
    log::error!("{}", message);
    eprintln!("scbridge: {}", message);
    process::exit(code);
}

fn main() -> std::io::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("{}", USAGE);
        return Ok(());
    }
    let verbose = args.iter().any(|a| a == "--verbose" || a == "-v");
    init_logging(verbose);

    let mut config = match arg_value(&args, "--config") {
        Some(path) => Config::load_from(Path::new(path)).unwrap_or_else(|e| fail(e, 2)),
        None => Config::load(),
    };

    if let Some(port) = arg_value(&args, "--port") {
        let port: u16 = port
            .parse()
            .unwrap_or_else(|_| fail(format!("invalid --port '{}'", port), 2));
        let host = config
            .bridge
            .listen
            .rsplit_once(':')
            .map(|(host, _)| host.to_string())
            .unwrap_or_else(|| "127.0.0.1".to_string());
        config.bridge.listen = format!("{}:{}", host, port);
    }
    if let Some(engine) = arg_value(&args, "--engine") {
        config.engine.address = engine.to_string();
    }
    if let Some(coordinator) = arg_value(&args, "--coordinator") {
        config.bridge.coordinator = Some(coordinator.to_string());
    }
    if let Some(prefix) = arg_value(&args, "--prefix") {
        config.dispatch.prefix = normalize_prefix(prefix);
    }
    if args.iter().any(|a| a == "--spawn-engine") {
        config.engine.spawn = true;
    }

    let mut engine = if config.engine.spawn {
        let mut child = EngineProcess::spawn(&config.engine).unwrap_or_else(|e| fail(e, 1));
        log::info!("waiting for scsynth to boot (log: {})", child.log_path().display());
        thread::sleep(ENGINE_BOOT_WAIT);
        if let Some(status) = child.check_health() {
            fail(format!("{}; see {}", status, child.log_path().display()), 1);
        }
        Some(child)
    } else {
        None
    };

    let mut bridge = match Bridge::connect(&config) {
        Ok(bridge) => bridge,
        Err(BridgeError::Definition(e)) => fail(format!("invalid instrument in config: {}", e), 2),
        Err(e) => fail(e, 1),
    };

    let result = bridge.run();

    if let Some(child) = engine.as_mut() {
        child.stop();
    }
    result
}
