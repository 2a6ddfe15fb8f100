use crate::ast::printer::DebugPrinter;
use crate::config::DecompilerSettings;
use crate::decompiler::Decompiler;
use crate::error::{Error, Result};
use crate::metadata::{InMemoryMetadata, MethodId, ResolverContext};
use std::path::PathBuf;

/// Arguments for the decompile command
#[derive(Debug, Clone, Default)]
pub struct DecompileArgs {
    pub input_path: PathBuf,
    pub method: Option<u32>,
    pub settings_path: Option<PathBuf>,
    pub output_path: Option<PathBuf>,
    pub always_braces: bool,
    pub no_string_switch: bool,
    pub no_sparse_switch: bool,
    pub no_increments: bool,
}

impl DecompileArgs {
    /// Settings file (or defaults) with the command-line flags applied on top
    pub fn to_settings(&self) -> Result<DecompilerSettings> {
        let mut settings = match &self.settings_path {
            Some(path) => DecompilerSettings::load(path)?,
            None => DecompilerSettings::default(),
        };
        if self.always_braces {
            settings.always_use_braces = true;
        }
        if self.no_string_switch {
            settings.switch_statement_on_string = false;
        }
        if self.no_sparse_switch {
            settings.sparse_integer_switch = false;
        }
        if self.no_increments {
            settings.introduce_increment_and_decrement = false;
        }
        Ok(settings)
    }
}

/// Run the decompile subcommand
pub fn decompile(args: &DecompileArgs) -> Result<()> {
    let metadata = InMemoryMetadata::load(&args.input_path)?;
    let settings = args.to_settings()?;
    let decompiler = Decompiler::new(ResolverContext::new(&metadata, &metadata), settings);
    let printer = DebugPrinter::new();

    match args.method {
        Some(method) => decompiler.decompile_into(MethodId(method), &printer)?,
        None => {
            let report = decompiler.decompile_assembly(&printer);
            if let Some((method, error)) = report.failures.first() {
                eprintln!(
                    "{} of {} methods failed; first failure in {}: {}",
                    report.failures.len(),
                    report.failures.len() + report.succeeded.len(),
                    method,
                    error
                );
            }
        }
    }

    let output = printer.output();
    match &args.output_path {
        Some(path) => {
            std::fs::write(path, &output).map_err(Error::from)?;
            println!("Decompiled code written to: {}", path.display());
        }
        None => print!("{}", output),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_settings_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{ "always_use_braces": false, "foreach_statements": false }"#)
            .expect("write settings");
        let args = DecompileArgs {
            settings_path: Some(path),
            always_braces: true,
            no_increments: true,
            ..DecompileArgs::default()
        };
        let settings = args.to_settings().expect("settings");
        assert!(settings.always_use_braces);
        assert!(!settings.introduce_increment_and_decrement);
        assert!(!settings.foreach_statements);
        assert!(settings.switch_statement_on_string);
    }
}
