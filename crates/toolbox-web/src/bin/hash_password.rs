//! Prints an argon2id hash for a `[[users]]` entry in the server config.

use std::io::{self, Write};
use std::process::ExitCode;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHasher, SaltString},
    Argon2,
};

fn main() -> ExitCode {
    match run() {
        Ok(hash) => {
            println!("{hash}");
            ExitCode::SUCCESS
        }
        Err(message) => {
            eprintln!("{message}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<String, String> {
    eprint!("Enter password: ");
    io::stderr().flush().map_err(|e| e.to_string())?;

    let mut password = String::new();
    io::stdin()
        .read_line(&mut password)
        .map_err(|e| format!("Failed to read password: {e}"))?;
    let password = password.trim_end_matches(['\r', '\n']);

    if password.is_empty() {
        return Err("Password cannot be empty".to_string());
    }

    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| format!("Failed to hash password: {e}"))
}
