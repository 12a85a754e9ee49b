use std::path::PathBuf;

use cfg2dfg::{LowerOptions, PassOptions};
use clap::{ArgGroup, ArgMatches, Command, arg, command, value_parser};

pub(crate) fn cli() -> ArgMatches {
    command!()
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(arg!(-v --verbose ... "Raise the log level (repeatable)").global(true))
        .subcommand(lowering_args(output_args(input_args(
            command!("dfg").about("Lower functions to dataflow graphs in DOT format"),
        ))))
        .subcommand(pass_args(output_args(input_args(
            command!("cfg").about("Export the control-flow graph of functions in DOT format"),
        ))))
        .subcommand(
            command!("render")
                .about("Render graph to specified format")
                .subcommand_required(true)
                .subcommand(lowering_args(output_args(input_args(
                    command!("pdf").about("Render dataflow graphs to PDF files"),
                )))),
        )
        .subcommand(
            pass_args(input_args(
                command!("opt").about("Run the IR passes and print the resulting IR"),
            ))
            .arg(
                arg!(-o --output <OUTPUT> "Write the IR to a file instead of stdout")
                    .value_parser(value_parser!(PathBuf)),
            ),
        )
        .get_matches()
}

fn input_args(cmd: Command) -> Command {
    cmd.arg(arg!(-i --input <INPUT> "Raw input (inline)"))
        .arg(arg!(-f --file <INPUT> "Source file to process").value_parser(value_parser!(PathBuf)))
        .group(
            ArgGroup::new("input-source")
                .args(["input", "file"])
                .required(true)
                .multiple(false),
        )
}

fn output_args(cmd: Command) -> Command {
    cmd.arg(
        arg!(-o --output <DIR> "Directory the files are written to")
            .value_parser(value_parser!(PathBuf))
            .default_value("."),
    )
    .arg(arg!(--function <NAME> "Only process this function"))
}

fn pass_args(cmd: Command) -> Command {
    cmd.arg(arg!(--"merge-blocks" "Merge straight-line block chains first"))
        .arg(arg!(--"enforce-mem-order" "Thread a memory-order token through loads and stores"))
}

fn lowering_args(cmd: Command) -> Command {
    pass_args(cmd)
        .arg(arg!(--"no-entry-stream" "Do not gate branch steers with an entry stream"))
        .arg(arg!(--"memory-deps" "Wire the last store to every later load"))
        .arg(arg!(--"direct-merge" "Wire values behind unconditional branches straight into merges"))
}

pub(crate) fn pass_options(matches: &ArgMatches) -> PassOptions {
    PassOptions {
        merge_blocks: matches.get_flag("merge-blocks"),
        enforce_memory_order: matches.get_flag("enforce-mem-order"),
    }
}

pub(crate) fn lower_options(matches: &ArgMatches) -> LowerOptions {
    LowerOptions {
        entry_stream: !matches.get_flag("no-entry-stream"),
        memory_dependencies: matches.get_flag("memory-deps"),
        trace_controlling_branch: !matches.get_flag("direct-merge"),
    }
}
