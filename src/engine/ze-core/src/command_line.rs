use fnv::FnvHashMap;
use once_cell::sync::Lazy;
use std::str::FromStr;

/// Switches given to the process, in the `-name` or `-name=value` form.
/// Names are case-insensitive and any number of leading dashes is accepted.
#[derive(Default, Debug, Clone)]
pub struct CommandLine {
    switches: FnvHashMap<String, Option<String>>,
}

static PROCESS_COMMAND_LINE: Lazy<CommandLine> =
    Lazy::new(|| CommandLine::parse(std::env::args().skip(1)));

impl CommandLine {
    pub fn parse<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut switches = FnvHashMap::default();
        for arg in args {
            let arg = arg.as_ref().trim_start_matches('-');
            if arg.is_empty() {
                continue;
            }

            match arg.split_once('=') {
                Some((name, value)) => {
                    switches.insert(name.to_ascii_lowercase(), Some(value.to_string()))
                }
                None => switches.insert(arg.to_ascii_lowercase(), None),
            };
        }

        Self { switches }
    }

    /// The command line of the running process, parsed once
    pub fn process() -> &'static CommandLine {
        &PROCESS_COMMAND_LINE
    }

    pub fn has(&self, name: &str) -> bool {
        self.switches.contains_key(&name.to_ascii_lowercase())
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.switches
            .get(&name.to_ascii_lowercase())
            .and_then(|value| value.as_deref())
    }

    pub fn value_as<T: FromStr>(&self, name: &str) -> Option<T> {
        self.value(name).and_then(|value| value.parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use crate::command_line::CommandLine;

    #[test]
    fn parse_flags_and_values() {
        let cmd = CommandLine::parse(["-debuggerwait", "--StablePowerState", "-frames=3", "-"]);
        assert!(cmd.has("debuggerwait"));
        assert!(cmd.has("stablepowerstate"));
        assert!(!cmd.has("dumpshaders"));
        assert_eq!(cmd.value("frames"), Some("3"));
        assert_eq!(cmd.value_as::<u32>("frames"), Some(3));
        assert_eq!(cmd.value("debuggerwait"), None);
    }
}
