use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use crate::services::supervisor::StartError;

/// Search path handed to every child, so package-manager installs are found
/// no matter how the dashboard itself was launched.
pub const SEARCH_PATH: &str = "/opt/homebrew/bin:/usr/local/bin:/usr/bin:/bin:/usr/sbin:/sbin";

const HUGO: &str = "hugo";

/// How a server's command line is executed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandLine {
    /// Interpreted by `/bin/sh -c`
    Shell(String),
    /// Executed directly, no shell in between
    Direct { program: String, args: Vec<String> },
}

impl CommandLine {
    /// Tokenises `command` with shell quoting rules and applies the hugo rewrite
    pub fn parse(command: &str, shell: bool) -> Result<Self, StartError> {
        let line = command.trim();
        if line.is_empty() {
            return Err(StartError::EmptyCommand);
        }

        let mut tokens =
            shell_words::split(line).map_err(|e| StartError::InvalidCommand(e.to_string()))?;
        if tokens.is_empty() {
            return Err(StartError::EmptyCommand);
        }
        let is_hugo = tokens[0] == HUGO;

        if shell {
            let script = if !is_hugo {
                line.to_string()
            } else {
                match line.strip_prefix(HUGO) {
                    Some(rest) if rest.is_empty() || rest.starts_with(char::is_whitespace) => {
                        format!("{} server{}", HUGO, rest)
                    }
                    // program token was quoted; rebuild from tokens
                    _ => {
                        tokens.insert(1, "server".to_string());
                        shell_words::join(&tokens)
                    }
                }
            };
            return Ok(CommandLine::Shell(script));
        }

        let program = tokens.remove(0);
        if is_hugo {
            tokens.insert(0, "server".to_string());
        }
        Ok(CommandLine::Direct {
            program,
            args: tokens,
        })
    }

    /// Display form used in logs
    pub fn program(&self) -> &str {
        match self {
            CommandLine::Shell(script) => script.split_whitespace().next().unwrap_or_default(),
            CommandLine::Direct { program, .. } => program,
        }
    }

    /// Builds the tokio command with cwd, PATH override and piped output
    pub fn to_command(&self, cwd: &Path) -> Command {
        let mut command = match self {
            CommandLine::Shell(script) => {
                let mut c = Command::new("/bin/sh");
                c.arg("-c").arg(script);
                c
            }
            CommandLine::Direct { program, args } => {
                let mut c = Command::new(program);
                c.args(args);
                c
            }
        };

        command
            .current_dir(cwd)
            .env("PATH", SEARCH_PATH)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // own process group so stop signals reach the whole pipeline
        #[cfg(unix)]
        unsafe {
            command.pre_exec(|| {
                let _ = libc::setpgid(0, 0);
                Ok(())
            });
        }

        command
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_respects_quotes() {
        let cmd = CommandLine::parse(r#"echo "hello world" 'a b'"#, false).unwrap();
        assert_eq!(
            cmd,
            CommandLine::Direct {
                program: "echo".into(),
                args: vec!["hello world".into(), "a b".into()],
            }
        );
    }

    #[test]
    fn test_shell_keeps_operators() {
        let cmd = CommandLine::parse("  npm run dev | tee out.log  ", true).unwrap();
        assert_eq!(cmd, CommandLine::Shell("npm run dev | tee out.log".into()));
        assert_eq!(cmd.program(), "npm");
    }

    #[test]
    fn test_hugo_rewrite() {
        let direct = CommandLine::parse("hugo --port 1313", false).unwrap();
        assert_eq!(
            direct,
            CommandLine::Direct {
                program: "hugo".into(),
                args: vec!["server".into(), "--port".into(), "1313".into()],
            }
        );

        let shell = CommandLine::parse("hugo -D", true).unwrap();
        assert_eq!(shell, CommandLine::Shell("hugo server -D".into()));

        let bare = CommandLine::parse("hugo", true).unwrap();
        assert_eq!(bare, CommandLine::Shell("hugo server".into()));

        // only the exact program name triggers it
        let other = CommandLine::parse("hugo-extended -D", true).unwrap();
        assert_eq!(other, CommandLine::Shell("hugo-extended -D".into()));
    }

    #[test]
    fn test_rejects_empty_and_unbalanced() {
        assert!(matches!(
            CommandLine::parse("   ", true),
            Err(StartError::EmptyCommand)
        ));
        assert!(matches!(
            CommandLine::parse("echo \"oops", false),
            Err(StartError::InvalidCommand(_))
        ));
    }
}
