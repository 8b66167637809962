use std::io::Write;

use assert_cmd::Command;
use predicates as pred;
use tempfile::NamedTempFile;

#[test]
fn end_to_end_session_outputs_expected_balances() {
    // A clerk session: one committed charge, one operator abort, one
    // insufficient-funds refusal and one malformed scan. Only the first
    // charge may move money.
    let mut file = NamedTempFile::new().expect("create temp file");
    writeln!(
        file,
        "op,id,name,amount,payload,outcome\n\
    account,ACC-1,Alice,50.00,,\n\
    account,ACC-2,Bob,5.00,,\n\
    merchant,SHOP-1,Bakery,,,\n\
    charge,SHOP-1,,20.00,MEMBER:ACC-1,confirm\n\
    charge,SHOP-1,,10.00,MEMBER:ACC-1,abort\n\
    charge,SHOP-1,,20.00,ACC-2,confirm\n\
    charge,SHOP-1,,15.00,garbage,confirm\n\
    charge,SHOP-2,,15.00,ACC-1,confirm"
    )
    .unwrap();

    let exe = env!("CARGO_BIN_EXE_giftcard-ledger");
    let mut cmd = Command::new(exe);
    cmd.arg(file.path());

    cmd.assert()
        .success()
        .stdout(pred::str::contains(
            "committed 20.00 from ACC-1: balance 30.00, accrued 20.00",
        ))
        .stdout(pred::str::contains("account,balance"))
        .stdout(pred::str::contains("ACC-1,30.00"))
        .stdout(pred::str::contains("ACC-2,5.00"))
        .stdout(pred::str::contains("merchant,accrued_total"))
        .stdout(pred::str::contains("SHOP-1,20.00"))
        .stderr(pred::str::contains("insufficient funds"))
        .stderr(pred::str::contains("malformed identity payload"))
        .stderr(pred::str::contains("merchant SHOP-2 not found"));
}

#[test]
fn missing_script_argument_fails() {
    let exe = env!("CARGO_BIN_EXE_giftcard-ledger");
    Command::new(exe)
        .assert()
        .failure()
        .stderr(pred::str::contains("session-script"));
}
