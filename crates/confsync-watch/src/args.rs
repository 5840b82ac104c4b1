use anyhow::{Result, bail};
use confsync_client::Source;

const USAGE: &str =
    "usage: confsync-watch <name> [--source file|http|tcp|snapshot]";

#[derive(Debug)]
pub struct WatchArgs {
    pub name: String,
    pub source: Source,
}

impl WatchArgs {
    pub fn parse<I>(mut args: I) -> Result<Self>
    where
        I: Iterator<Item = String>,
    {
        let mut name = None;
        let mut source = Source::CenterTcp;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--source" => {
                    let raw = args.next().unwrap_or_default();
                    source = match raw.as_str() {
                        "file" => Source::File,
                        "http" => Source::CenterHttp,
                        "tcp" => Source::CenterTcp,
                        "snapshot" => Source::Snapshot,
                        other => bail!(
                            "unknown source: {other:?} ({USAGE})"
                        ),
                    };
                }
                "-h" | "--help" => bail!("{USAGE}"),
                other if other.starts_with('-') => {
                    bail!("unknown argument: {other} ({USAGE})");
                }
                positional => {
                    if name.is_some() {
                        bail!("too many arguments: {positional} ({USAGE})");
                    }
                    name = Some(positional.to_string());
                }
            }
        }

        let Some(name) = name else {
            bail!("missing logical name ({USAGE})");
        };
        Ok(Self { name, source })
    }
}
