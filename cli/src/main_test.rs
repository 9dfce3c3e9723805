use std::path::Path;

use clap::CommandFactory;

use super::*;

fn policy_of(args: &[&str]) -> Option<Policy> {
    let mut argv = vec!["clinic"];
    argv.extend_from_slice(args);
    Cli::try_parse_from(argv).unwrap().command.policy()
}

#[test]
fn cli_definition_is_consistent() {
    Cli::command().debug_assert();
}

#[test]
fn auth_commands_are_public() {
    assert_eq!(policy_of(&["login", "a@b.com", "--password", "x"]), None);
    assert_eq!(policy_of(&["forgot-password", "a@b.com"]), None);
    assert_eq!(policy_of(&["logout"]), None);
    assert_eq!(policy_of(&["status"]), None);
}

#[test]
fn patient_only_commands() {
    assert_eq!(policy_of(&["patients", "me"]), Some(Policy::PatientOnly));
    assert_eq!(policy_of(&["patients", "update", "--data", "{}"]), Some(Policy::PatientOnly));
    assert_eq!(policy_of(&["appointments", "book", "--data", "{}"]), Some(Policy::PatientOnly));
}

#[test]
fn doctor_only_commands() {
    assert_eq!(policy_of(&["doctors", "me"]), Some(Policy::DoctorOnly));
    assert_eq!(policy_of(&["appointments", "complete", "4"]), Some(Policy::DoctorOnly));
    assert_eq!(policy_of(&["consultations", "create", "--data", "{}"]), Some(Policy::DoctorOnly));
    assert_eq!(policy_of(&["patients", "get", "9"]), Some(Policy::DoctorOnly));
}

#[test]
fn remaining_commands_need_any_session() {
    assert_eq!(policy_of(&["doctors", "list"]), Some(Policy::Authenticated));
    assert_eq!(policy_of(&["appointments", "cancel", "4"]), Some(Policy::Authenticated));
    assert_eq!(policy_of(&["consultations", "history", "3"]), Some(Policy::Authenticated));
    assert_eq!(policy_of(&["users", "me"]), Some(Policy::Authenticated));
}

#[test]
fn register_collects_repeated_roles() {
    let cli = Cli::try_parse_from([
        "clinic", "register", "--name", "Dr Who", "--email", "who@example.com", "--password", "t", "--role", "DOCTOR",
        "--license-number", "L1",
    ])
    .unwrap();
    let Command::Register(args) = cli.command else { panic!("expected register") };
    assert_eq!(args.roles, vec!["DOCTOR".to_owned()]);
    assert_eq!(args.license_number.as_deref(), Some("L1"));
}

#[test]
fn mime_is_guessed_from_extension() {
    assert_eq!(guess_mime(Path::new("me.PNG")), Some("image/png"));
    assert_eq!(guess_mime(Path::new("me.jpeg")), Some("image/jpeg"));
    assert_eq!(guess_mime(Path::new("notes.txt")), None);
    assert_eq!(guess_mime(Path::new("noext")), None);
}

#[test]
fn parse_data_rejects_invalid_json() {
    assert!(matches!(parse_data("{not json"), Err(CliError::InvalidJson(_))));
    assert_eq!(parse_data(r#"{"doctorId":3}"#).unwrap()["doctorId"], 3);
}
