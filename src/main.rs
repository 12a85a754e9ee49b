mod cli;

use std::path::{Path, PathBuf};

use cfg2dfg::{Error, Module, render};
use clap::ArgMatches;
use log::{error, info};
use tracing_subscriber::EnvFilter;

fn main() {
    let matches = cli::cli();
    init_logging(matches.get_count("verbose"));

    if let Err(e) = run(&matches) {
        error!("{e}");
        std::process::exit(1);
    }
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(matches: &ArgMatches) -> Result<(), Error> {
    match matches.subcommand() {
        Some(("dfg", sub)) => {
            let options = cli::lower_options(sub);
            for_each_function(sub, "dot", |func, path| {
                let graph = cfg2dfg::lower(func, &options);
                cfg2dfg::write_output(path, render::to_dot(&graph))
            })
        }
        Some(("cfg", sub)) => for_each_function(sub, "cfg.dot", |func, path| {
            cfg2dfg::write_output(path, render::cfg_to_dot(func))
        }),
        Some(("render", target)) => match target.subcommand() {
            Some(("pdf", sub)) => {
                let options = cli::lower_options(sub);
                for_each_function(sub, "pdf", |func, path| {
                    let graph = cfg2dfg::lower(func, &options);
                    cfg2dfg::render_to_pdf(&graph, path)
                })
            }
            _ => Err(Error::InvalidParams),
        },
        Some(("opt", sub)) => {
            let module = load(sub)?;
            match sub.get_one::<PathBuf>("output") {
                Some(path) => cfg2dfg::write_output(path, module.to_string()),
                None => {
                    print!("{module}");
                    Ok(())
                }
            }
        }
        _ => Err(Error::InvalidParams),
    }
}

fn read_input(matches: &ArgMatches) -> Result<String, Error> {
    if let Some(input) = matches.get_one::<String>("input") {
        return Ok(input.clone());
    }
    let path = matches
        .get_one::<PathBuf>("file")
        .ok_or(Error::InvalidParams)?;
    std::fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.clone(),
        source,
    })
}

fn load(matches: &ArgMatches) -> Result<Module, Error> {
    let mut module = cfg2dfg::parse_module(&read_input(matches)?)?;
    if cfg2dfg::optimize_module(&mut module, cli::pass_options(matches)) {
        info!("IR passes rewrote the module");
    }
    Ok(module)
}

/// Writes one `<dir>/<function>.<ext>` per selected function. A failure for
/// one function is logged and the rest are still processed.
fn for_each_function(
    matches: &ArgMatches,
    ext: &str,
    mut emit: impl FnMut(&cfg2dfg::Function, &Path) -> Result<(), Error>,
) -> Result<(), Error> {
    let module = load(matches)?;
    let dir = matches
        .get_one::<PathBuf>("output")
        .ok_or(Error::InvalidParams)?;
    std::fs::create_dir_all(dir).map_err(|source| Error::Io {
        path: dir.clone(),
        source,
    })?;

    let name = matches.get_one::<String>("function").map(String::as_str);
    for func in cfg2dfg::select_functions(&module, name)? {
        let path = dir.join(format!("{}.{ext}", func.name));
        match emit(func, &path) {
            Ok(()) => info!("@{}: wrote {}", func.name, path.display()),
            Err(e) => error!("@{}: {e}", func.name),
        }
    }
    Ok(())
}
