use clap::{value_parser, crate_version, Arg, ArgAction, Command, ValueHint};

const IN_HELP: &str = "the disk image can be TD0, IMD, or a flat image, containers are converted in memory";
const WRITE_HELP: &str = "changes are saved to the image in place, so it must be a flat image";
const GEOM_LONG_HELP: &str = "Geometry as cylinders,heads,sectors,bytes per sector, e.g. `40,2,9,512`.
This overrides the geometry that would be classified from the container.";
const FILL_LONG_HELP: &str = "Byte used for sectors that were never captured, decimal or hex with a `0x` prefix.
Defaults to 0.";

fn file_arg(help: &'static str, req: bool) -> Arg {
    Arg::new("file").short('f').long("file").value_name("NAME").required(req).help(help)
}

fn indent_arg() -> Arg {
    Arg::new("indent").long("indent").help("JSON indentation, omit to minify")
        .value_name("SPACES")
        .value_parser(value_parser!(u16).range(0..16))
        .required(false)
}

fn dimg_arg(req: bool) -> Arg {
    Arg::new("dimg").short('d').long("dimg").help("path to disk image itself")
        .value_name("PATH")
        .value_hint(ValueHint::FilePath)
        .required(req)
}

fn strict_arg() -> Arg {
    Arg::new("strict").long("strict").help("treat sequence errors and truncation as fatal")
        .action(ArgAction::SetTrue)
}

pub fn build_cli() -> Command {
    let long_help = "flopkit is always invoked with exactly one of several subcommands.
Images are read as TD0, IMD, or flat sector dumps, the file system is detected automatically.
Set RUST_LOG environment variable to control logging level.
  levels: trace,debug,info,warn,error

Examples:
---------
convert to flat image: `flopkit convert -d mydisk.td0 -o mydisk.img`
see what was found:    `flopkit detect -d mydisk.td0 --indent 2`
list files:            `flopkit catalog -d mydisk.imd`
copy out a file:       `flopkit get -d mydisk.td0 -f letter.txt > letter.txt`
copy in a file:        `flopkit put -d mydisk.img -f letter.txt < letter.txt`
recover everything:    `flopkit extract -d mydisk.td0 -o ./recovered`";

    let mut main_cmd = Command::new("flopkit")
        .about("Recovers floppy disk images and the files on them.")
        .after_long_help(long_help)
        .version(crate_version!());

    main_cmd = main_cmd.subcommand(
        Command::new("convert")
            .arg(dimg_arg(true))
            .arg(Arg::new("output").short('o').long("output").help("path of the flat image to write")
                .value_name("PATH")
                .value_hint(ValueHint::FilePath)
                .required(true))
            .arg(strict_arg())
            .arg(Arg::new("fill").long("fill").help("fill byte for missing sectors")
                .value_name("BYTE")
                .long_help(FILL_LONG_HELP)
                .required(false))
            .arg(Arg::new("fix-boot").long("fix-boot").help("write the boot signature and HP150 OEM ID")
                .action(ArgAction::SetTrue))
            .arg(Arg::new("geometry").long("geometry").help("force the geometry")
                .value_name("C,H,S,B")
                .long_help(GEOM_LONG_HELP)
                .required(false))
            .about("convert a disk image to a flat image")
            .after_help("statistics and diagnostics are written to stderr")
    );
    main_cmd = main_cmd.subcommand(
        Command::new("geometry")
            .arg(dimg_arg(true))
            .arg(strict_arg())
            .arg(indent_arg())
            .about("write the disk geometry as a JSON string")
            .after_help(IN_HELP)
    );
    main_cmd = main_cmd.subcommand(
        Command::new("detect")
            .arg(dimg_arg(true))
            .arg(indent_arg())
            .about("write the file system candidates as a JSON string")
            .after_help(IN_HELP)
    );
    main_cmd = main_cmd.subcommand(
        Command::new("catalog")
            .arg(dimg_arg(true))
            .arg(file_arg("wildcard pattern, e.g. `*.COM`",false))
            .visible_alias("ls")
            .visible_alias("dir")
            .visible_alias("cat")
            .about("write disk image catalog to stdout")
            .after_help(IN_HELP)
    );
    main_cmd = main_cmd.subcommand(
        Command::new("get")
            .arg(dimg_arg(true))
            .arg(file_arg("name of the file inside the disk image",true))
            .arg(Arg::new("console").long("console").help("format for console unconditionally")
                .action(ArgAction::SetTrue))
            .about("read a file from a disk image, write to stdout")
            .after_help(IN_HELP)
    );
    main_cmd = main_cmd.subcommand(
        Command::new("put")
            .arg(dimg_arg(true))
            .arg(file_arg("name of the file inside the disk image",true))
            .about("read from stdin, write a file to a disk image")
            .after_help(WRITE_HELP)
    );
    main_cmd = main_cmd.subcommand(
        Command::new("delete")
            .arg(dimg_arg(true))
            .arg(file_arg("name of the file inside the disk image",true))
            .visible_alias("del")
            .visible_alias("era")
            .about("delete a file inside a disk image")
            .after_help(WRITE_HELP)
    );
    main_cmd = main_cmd.subcommand(
        Command::new("usage")
            .arg(dimg_arg(true))
            .arg(indent_arg())
            .about("write disk usage as a JSON string")
    );
    main_cmd = main_cmd.subcommand(
        Command::new("extract")
            .arg(dimg_arg(true))
            .arg(Arg::new("output").short('o').long("output").help("host directory to write into")
                .value_name("DIR")
                .value_hint(ValueHint::DirPath)
                .required(true))
            .about("extract every file to a host directory")
            .after_help("if no file system is found the raw analysis is written instead")
    );
    main_cmd = main_cmd.subcommand(
        Command::new("completions")
            .arg(Arg::new("shell").short('s').long("shell").help("shell type")
                .value_name("SHELL")
                .value_parser(["bash","elv","fish","ps1","zsh"])
                .required(true))
            .about("write completions script to stdout")
    );
    main_cmd
}
