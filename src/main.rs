mod binary;

use std::{env, path::Path, process};
use whelk_shell::{Shell, ShellBuilder};

const HELP: &str = "\
usage: whelk [options] [file [arguments...]]

options:
    --posix       use the POSIX grammar
    -c <string>   evaluate the string, then exit
    --skip-init   do not source the init files
    --version     print the version and exit
    -h, --help    print this help";

fn source_init_files(shell: &mut Shell) {
    let (system, user) = if shell.options.posix_mode {
        ("/etc/posixshrc", ".posixshrc")
    } else {
        ("/etc/shellrc", ".shellrc")
    };
    if Path::new(system).exists() {
        if let Err(err) = shell.execute_script(Path::new(system), Vec::new()) {
            eprintln!("Shell: {}: {}", system, err);
        }
    }
    if let Ok(home) = env::var("HOME") {
        let user_rc = Path::new(&home).join(user);
        if user_rc.exists() {
            if let Err(err) = shell.execute_script(&user_rc, Vec::new()) {
                eprintln!("Shell: {}: {}", user_rc.display(), err);
            }
        }
    }
}

fn main() {
    let mut args = env::args().skip(1).peekable();
    let mut posix = false;
    let mut skip_init = false;
    let mut command: Option<String> = None;
    let mut script: Option<String> = None;
    let mut script_args: Vec<String> = Vec::new();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--posix" => posix = true,
            "--skip-init" => skip_init = true,
            "--version" => {
                println!("whelk {}", whelk_shell::version());
                return;
            }
            "-h" | "--help" => {
                println!("{}", HELP);
                return;
            }
            "-c" => match args.next() {
                Some(text) => command = Some(text),
                None => {
                    eprintln!("Shell: -c requires an argument");
                    process::exit(2);
                }
            },
            _ => {
                script = Some(arg);
                script_args = args.collect();
                break;
            }
        }
    }

    let mut shell = ShellBuilder::new()
        .install_signal_handler()
        .block_signals()
        .set_unique_pid()
        .as_binary();
    shell.options.posix_mode = posix;

    if !skip_init {
        source_init_files(&mut shell);
    }

    if let Some(text) = command {
        let status = shell.run_command(&text);
        shell.prep_for_exit();
        process::exit(status);
    }

    if let Some(path) = script {
        match shell.execute_script(Path::new(&path), script_args) {
            Ok(status) => {
                shell.prep_for_exit();
                process::exit(status);
            }
            Err(err) => {
                eprintln!("Shell: {}: {}", path, err);
                process::exit(127);
            }
        }
    }

    if !atty::is(atty::Stream::Stdin) {
        // Piped input: evaluate it as a script.
        use std::io::Read;
        let mut source = String::new();
        if std::io::stdin().read_to_string(&mut source).is_ok() {
            let status = shell.run_command(&source);
            shell.prep_for_exit();
            process::exit(status);
        }
        process::exit(1);
    }

    let status = binary::Binary::new(shell).main_loop();
    process::exit(status);
}
