use assert_cmd::Command;
use predicates::str::{contains, diff};

#[test]
fn debugs_with_breakpoints() {
    let mut cmd = Command::cargo_bin("toyasm").unwrap();
    cmd.arg("debug")
        .arg("tests/files/counter.asm")
        .arg("--minimal")
        .arg("--command")
        .arg(include_str!("commands/breakpoints"));

    cmd.assert()
        .success()
        .stdout(contains("3"))
        .stderr(diff(
            include_str!("expected/breakpoints").replace("\r\n", "\n"),
        ));
}

#[test]
fn debugs_with_watchpoints() {
    let mut cmd = Command::cargo_bin("toyasm").unwrap();
    cmd.arg("debug")
        .arg("tests/files/counter.asm")
        .arg("--minimal")
        .arg("--command")
        .arg(include_str!("commands/watchpoints"));

    cmd.assert().success().stderr(diff(
        include_str!("expected/watchpoints").replace("\r\n", "\n"),
    ));
}

#[test]
fn runs_to_cursor() {
    let mut cmd = Command::cargo_bin("toyasm").unwrap();
    cmd.arg("debug")
        .arg("tests/files/counter.asm")
        .arg("--minimal")
        .arg("--command")
        .arg("break add 5; until 4; get R0");

    cmd.assert()
        .success()
        .stderr(contains("Reached 0x0004"))
        .stderr(contains("R0: 1"));
}

#[test]
fn suggests_commands() {
    let mut cmd = Command::cargo_bin("toyasm").unwrap();
    cmd.arg("debug")
        .arg("tests/files/hello.asm")
        .arg("--minimal")
        .arg("--command")
        .arg("stpe; break ad start; get missing");

    cmd.assert()
        .success()
        .stderr(contains("Not a command: `stpe`."))
        .stderr(contains("Did you mean `step`?"))
        .stderr(contains("Invalid subcommand: `break ad`."))
        .stderr(contains("Label not found named `missing`."));
}

#[test]
fn explains_instructions_in_debugger() {
    let mut cmd = Command::cargo_bin("toyasm").unwrap();
    cmd.arg("debug")
        .arg("tests/files/hello.asm")
        .arg("--minimal")
        .arg("--command")
        .arg("hlt");

    cmd.assert()
        .success()
        .stderr(contains("Instructions cannot be run from the debugger"));
}

#[test]
fn prints_help_message() {
    let mut cmd = Command::cargo_bin("toyasm").unwrap();
    cmd.arg("debug")
        .arg("tests/files/hello.asm")
        .arg("--minimal")
        .arg("--command")
        .arg("help");

    cmd.assert().success().stderr(diff(format!(
        "{}\n",
        include_str!("../src/repl/help.txt")
    )));
}

#[test]
fn step_back_without_trace() {
    let mut cmd = Command::cargo_bin("toyasm").unwrap();
    cmd.env("TOYASM_TRACE", "0")
        .arg("debug")
        .arg("tests/files/hello.asm")
        .arg("--minimal")
        .arg("--command")
        .arg("step; back; trace");

    cmd.assert()
        .success()
        .stderr(contains("Trace recording is disabled."));
}

#[test]
fn assembly_errors_stop_debugger() {
    let mut cmd = Command::cargo_bin("toyasm").unwrap();
    cmd.arg("debug")
        .arg("tests/files/undefined.asm")
        .arg("--command")
        .arg("continue");

    cmd.assert()
        .failure()
        .stderr(contains("asm::undefined_symbol"));
}
