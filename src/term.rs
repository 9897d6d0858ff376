use dialoguer::console::style;

pub fn info(message: impl AsRef<str>) {
    eprintln!(
        "{} {}",
        style("davy:").for_stderr().dim(),
        message.as_ref()
    );
}

pub fn warn(message: impl AsRef<str>) {
    eprintln!(
        "{} {}",
        style("davy: warning:").for_stderr().yellow().bold(),
        message.as_ref()
    );
}

pub fn error(message: impl AsRef<str>) {
    eprintln!(
        "{} {}",
        style("davy:").for_stderr().red().bold(),
        message.as_ref()
    );
}
