//! End-to-end scenarios driven through the real binary: each test feeds
//! a program via `-c` and asserts on the process's actual output, so
//! parsing, evaluation, spawning, and redirection are all on the path.

use std::process::Command;

fn run_native(script: &str) -> (String, i32) {
    run_with_args(&["--skip-init", "-c", script])
}

fn run_posix(script: &str) -> (String, i32) {
    run_with_args(&["--skip-init", "--posix", "-c", script])
}

fn run_with_args(args: &[&str]) -> (String, i32) {
    let output = Command::new(env!("CARGO_BIN_EXE_whelk"))
        .args(args)
        .output()
        .expect("failed to run the shell binary");
    (
        String::from_utf8_lossy(&output.stdout).into_owned(),
        output.status.code().unwrap_or(-1),
    )
}

#[test]
fn pipeline_orders_and_exits_cleanly() {
    let (stdout, status) = run_native("echo a b c | tr ' ' '\\n' | sort -r");
    assert_eq!(stdout, "c\nb\na\n");
    assert_eq!(status, 0);
}

#[test]
fn capture_stdout_as_list_with_slice() {
    let (stdout, _) = run_native("set x = $(echo one; echo two); echo $x[1]");
    assert_eq!(stdout, "two\n");
}

#[test]
fn posix_parameter_default() {
    let (stdout, _) = run_posix("unset FOO; echo ${FOO:-default}");
    assert_eq!(stdout, "default\n");
}

#[test]
fn for_loop_with_break() {
    let (stdout, status) =
        run_native("for i in 1 2 3 4 5 { if (test $i -gt 3) { break }; echo $i }");
    assert_eq!(stdout, "1\n2\n3\n");
    assert_eq!(status, 0);
}

#[test]
fn heredoc_with_deindent() {
    let (stdout, _) = run_native("cat <<~END\n    hello\n      world\n    END\n");
    assert_eq!(stdout, "hello\n  world\n");
}

#[test]
fn arithmetic_assignment_native() {
    let (stdout, _) = run_native("${math x = 2 * 3 + 4}; echo $x");
    assert_eq!(stdout, "10\n");
}

#[test]
fn arithmetic_assignment_posix() {
    let (stdout, _) = run_posix("x=$((2*3+4)); echo $x");
    assert_eq!(stdout, "10\n");
}

#[test]
fn logical_chains_short_circuit() {
    let (stdout, _) = run_native("true && echo ran; false && echo skipped");
    assert_eq!(stdout, "ran\n");
    let (stdout, _) = run_native("false || echo rescued");
    assert_eq!(stdout, "rescued\n");
}

#[test]
fn exit_code_of_last_command_propagates() {
    let (_, status) = run_native("false");
    assert_eq!(status, 1);
    let (_, status) = run_native("true");
    assert_eq!(status, 0);
}

#[test]
fn command_not_found_is_127() {
    let (_, status) = run_native("definitely-not-a-real-command-name");
    assert_eq!(status, 127);
}

#[test]
fn sequences_run_in_order() {
    let (stdout, _) = run_native("echo first; echo second");
    assert_eq!(stdout, "first\nsecond\n");
}

#[test]
fn functions_bind_arguments() {
    let (stdout, _) = run_native("greet(name) { echo hello $name }; greet world");
    assert_eq!(stdout, "hello world\n");
}

#[test]
fn function_return_stops_the_body() {
    let (stdout, status) =
        run_native("f() { echo before; return 3; echo after }; f; echo $?");
    assert_eq!(stdout, "before\n3\n");
    assert_eq!(status, 0);
}

#[test]
fn match_expression_selects_first_rule() {
    let (stdout, _) =
        run_native("match pear { app* { echo apple } p* { echo yes } * { echo no } }");
    assert_eq!(stdout, "yes\n");
}

#[test]
fn match_binds_captures_in_order() {
    let (stdout, _) =
        run_native("match pear-cake { *-* as (a b) { echo $a and $b } }");
    assert_eq!(stdout, "pear and cake\n");
}

#[test]
fn posix_while_loop_terminates() {
    let (stdout, _) =
        run_posix("i=0; while test $i -lt 3; do echo $i; i=$((i+1)); done");
    assert_eq!(stdout, "0\n1\n2\n");
}

#[test]
fn posix_until_loop_runs_when_false() {
    let (stdout, _) =
        run_posix("i=0; until test $i -ge 2; do echo tick; i=$((i+1)); done");
    assert_eq!(stdout, "tick\ntick\n");
}

#[test]
fn posix_case_matches_globs() {
    let (stdout, _) =
        run_posix("case pear.txt in *.rs) echo rust;; *.txt) echo text;; esac");
    assert_eq!(stdout, "text\n");
}

#[test]
fn posix_if_else_chain() {
    let (stdout, _) = run_posix("if false; then echo a; elif true; then echo b; else echo c; fi");
    assert_eq!(stdout, "b\n");
}

#[test]
fn posix_for_iterates_words() {
    let (stdout, _) = run_posix("for x in red green; do echo $x; done");
    assert_eq!(stdout, "red\ngreen\n");
}

#[test]
fn posix_env_prefix_is_scoped_to_the_command() {
    let (stdout, _) = run_posix("GREETING=hi sh -c 'echo $GREETING'");
    assert_eq!(stdout, "hi\n");
}

#[test]
fn posix_negation_inverts() {
    let (_, status) = run_posix("! false");
    assert_eq!(status, 0);
    let (_, status) = run_posix("! true");
    assert_eq!(status, 1);
}

#[test]
fn brace_range_expands_inline() {
    let (stdout, _) = run_native("echo {1..4}");
    assert_eq!(stdout, "1 2 3 4\n");
}

#[test]
fn brace_expansion_multiplies_adjacent_words() {
    let (stdout, _) = run_native("echo x{a,b}");
    assert_eq!(stdout, "xa xb\n");
}

#[test]
fn redirections_write_and_read_files() {
    let dir = std::env::temp_dir().join(format!("whelk-scenario-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let file = dir.join("out.txt");
    let (_, status) = run_native(&format!("echo stored > {}", file.display()));
    assert_eq!(status, 0);
    let (stdout, _) = run_native(&format!("cat < {}", file.display()));
    assert_eq!(stdout, "stored\n");

    let (_, _) = run_native(&format!("echo more >> {}", file.display()));
    let (stdout, _) = run_native(&format!("cat {}", file.display()));
    assert_eq!(stdout, "stored\nmore\n");
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn fd_duplication_reaches_stderr_consumers() {
    let (stdout, _) = run_native("sh -c 'echo oops >&2' 2>&1 | cat");
    assert_eq!(stdout, "oops\n");
}

#[test]
fn aliases_expand_before_spawn() {
    let (stdout, _) = run_native("alias greet='echo hi'; greet there");
    assert_eq!(stdout, "hi there\n");
}

#[test]
fn variables_scope_to_their_blocks_natively() {
    // The binding made inside the loop body dies with its frame; the
    // unset variable then expands to an empty list and the word vanishes.
    let (stdout, _) = run_native("for i in once { inner=$i }; echo $inner; echo done");
    assert_eq!(stdout, "\ndone\n");
}

#[test]
fn heredoc_literal_key_suppresses_interpolation() {
    let (stdout, _) = run_native("x=value; cat <<'END'\n$x\nEND\n");
    assert_eq!(stdout, "$x\n");
}

#[test]
fn heredoc_interpolates_by_default() {
    let (stdout, _) = run_posix("x=value; cat <<END\n$x\nEND\n");
    assert_eq!(stdout, "value\n");
}

#[test]
fn script_mode_populates_argv() {
    let dir = std::env::temp_dir().join(format!("whelk-script-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let script = dir.join("args.sh");
    std::fs::write(&script, "echo $1 $#\n").unwrap();
    let output = Command::new(env!("CARGO_BIN_EXE_whelk"))
        .args(["--skip-init", script.to_str().unwrap(), "first", "second"])
        .output()
        .expect("failed to run the shell binary");
    assert_eq!(String::from_utf8_lossy(&output.stdout), "first 2\n");
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn immediate_functions_compose() {
    let (stdout, _) = run_native("echo ${join : ${split , a,b,c}}");
    assert_eq!(stdout, "a:b:c\n");
}

#[test]
fn subshell_exit_does_not_kill_the_parent() {
    let (stdout, _) = run_native("{ sh -c 'exit 7' }; echo $?; echo alive");
    assert_eq!(stdout, "7\nalive\n");
}

#[test]
fn background_jobs_report_through_wait() {
    let (_, status) = run_native("sleep 0.1 &; wait");
    assert_eq!(status, 0);
}
