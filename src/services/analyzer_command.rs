//! Command line of the external stream analyzer.

use std::fmt;
use std::process::Stdio;
use tokio::process::Command as TokioCommand;

use crate::models::StreamTarget;

/// Program and arguments used to spawn one analyzer run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzerCommand {
    program: String,
    args: Vec<String>,
}

impl AnalyzerCommand {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// `tsp` pipeline receiving `target` over multicast: continuity checks,
    /// full table dumps and a bitrate report every second, output dropped
    pub fn tsp(program: impl Into<String>, target: &StreamTarget) -> Self {
        Self::new(
            program,
            [
                "-I",
                "ip",
                "--local-address",
                target.interface.as_str(),
                target.address.as_str(),
                "-O",
                "drop",
                "-P",
                "continuity",
                "-P",
                "tables",
                "--all-sections",
                "-P",
                "bitrate_monitor",
                "-p",
                "1",
                "-t",
                "1",
            ],
        )
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Build a process with both output pipes captured
    pub fn to_command(&self) -> TokioCommand {
        let mut cmd = TokioCommand::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl fmt::Display for AnalyzerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tsp_arguments() {
        let target = StreamTarget::new("233.198.134.1:3333", "Silk Way", "172.22.2.154");
        let command = AnalyzerCommand::tsp("tsp", &target);

        assert_eq!(command.program(), "tsp");
        assert_eq!(
            command.to_string(),
            "tsp -I ip --local-address 172.22.2.154 233.198.134.1:3333 -O drop \
             -P continuity -P tables --all-sections -P bitrate_monitor -p 1 -t 1"
        );
    }

    #[test]
    fn test_custom_program() {
        let target = StreamTarget::new("239.1.1.1:1234", "x", "10.0.0.1");
        let command = AnalyzerCommand::tsp("/opt/tsduck/bin/tsp", &target);
        assert_eq!(command.program(), "/opt/tsduck/bin/tsp");
        assert_eq!(command.args()[3], "10.0.0.1");
        assert_eq!(command.args()[4], "239.1.1.1:1234");
    }
}
