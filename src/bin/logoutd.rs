use anyhow::Result;

fn main() -> Result<()> {
    loginkit::cli::run(loginkit::cli::CliMode::Logoutd)
}
