//! luai CLI
//!
//! Runs Lua chunks in a fresh session and prints typed values read back
//! from the globals they leave behind.
//!
//! ```bash
//! luai -e 'conf = { name = "demo", ports = { 80, 443 } }' \
//!     --get conf.name:str --get conf.ports:len --get conf.ports.2:int
//! ```

use clap::Parser as ClapParser;
use luai::{FromStack, Session, SessionConfig, TableHandle, ValueKind};
use std::fmt;
use std::path::PathBuf;
use std::process;
use std::str::FromStr;
use tracing::debug;

#[derive(ClapParser)]
#[command(name = "luai")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run Lua chunks and print typed globals", long_about = None)]
struct Cli {
    /// Script file to run after any -e chunks
    script: Option<PathBuf>,

    /// Chunk to run before the script (repeatable)
    #[arg(short = 'e', long = "eval", value_name = "CODE")]
    chunks: Vec<String>,

    /// Load the standard library before running anything
    #[arg(long)]
    stdlib: bool,

    /// Value to print: a dotted path with an optional type
    /// (int, num, str, bool, kind, len), e.g. `conf.ports.2:int`
    #[arg(short, long = "get", value_name = "PATH[:TYPE]")]
    gets: Vec<Request>,
}

/// Requested conversion for a printed value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wanted {
    Int,
    Num,
    Str,
    Bool,
    Kind,
    Len,
}

/// One step of a dotted path
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Name(String),
    Index(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Request {
    global: String,
    path: Vec<Segment>,
    wanted: Wanted,
}

impl FromStr for Wanted {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "int" | "integer" => Ok(Wanted::Int),
            "num" | "number" => Ok(Wanted::Num),
            "str" | "string" => Ok(Wanted::Str),
            "bool" | "boolean" => Ok(Wanted::Bool),
            "kind" | "type" => Ok(Wanted::Kind),
            "len" | "length" => Ok(Wanted::Len),
            other => Err(format!("unknown type '{}'", other)),
        }
    }
}

impl FromStr for Request {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (path, wanted) = match s.rsplit_once(':') {
            Some((path, ty)) => (path, ty.parse()?),
            None => (s, Wanted::Kind),
        };
        let mut parts = path.split('.');
        let global = parts
            .next()
            .filter(|g| !g.is_empty())
            .ok_or_else(|| format!("empty path in '{}'", s))?
            .to_string();
        let path = parts
            .map(|part| match part.parse::<i64>() {
                Ok(index) => Ok(Segment::Index(index)),
                Err(_) if !part.is_empty() => Ok(Segment::Name(part.to_string())),
                Err(_) => Err(format!("empty path segment in '{}'", s)),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Request {
            global,
            path,
            wanted,
        })
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.global)?;
        for segment in &self.path {
            match segment {
                Segment::Name(name) => write!(f, ".{}", name)?,
                Segment::Index(index) => write!(f, ".{}", index)?,
            }
        }
        Ok(())
    }
}

fn get_in<T: FromStack>(table: &TableHandle, segment: &Segment) -> luai::Result<T> {
    match segment {
        Segment::Name(name) => table.get_field(name),
        Segment::Index(index) => table.get_index(*index),
    }
}

/// Walk `request` and fetch its last step as `T`
fn resolve<T: FromStack>(session: &Session, request: &Request) -> luai::Result<T> {
    let Some((last, tables)) = request.path.split_last() else {
        return session.get_global(&request.global);
    };
    let mut table = session.get_global::<TableHandle>(&request.global)?;
    for segment in tables {
        table = get_in(&table, segment)?;
    }
    get_in(&table, last)
}

fn render(session: &Session, request: &Request) -> luai::Result<String> {
    Ok(match request.wanted {
        Wanted::Int => resolve::<i64>(session, request)?.to_string(),
        Wanted::Num => resolve::<f64>(session, request)?.to_string(),
        Wanted::Str => resolve::<String>(session, request)?,
        Wanted::Bool => resolve::<bool>(session, request)?.to_string(),
        Wanted::Kind => resolve::<ValueKind>(session, request)?.to_string(),
        Wanted::Len => resolve::<TableHandle>(session, request)?.len()?.to_string(),
    })
}

fn run(cli: &Cli) -> luai::Result<Vec<String>> {
    let config = SessionConfig::from_env();
    let session = Session::with_config(config)?;
    if cli.stdlib {
        session.load_standard_library();
    }

    for chunk in &cli.chunks {
        session.exec(chunk)?;
    }
    if let Some(script) = &cli.script {
        session.run_file(script)?;
    }

    let mut lines = Vec::with_capacity(cli.gets.len());
    for request in &cli.gets {
        let value = render(&session, request)?;
        debug!(%request, %value, "resolved");
        lines.push(format!("{} = {}", request, value));
    }
    debug_assert_eq!(session.stack().top_index(), 0);
    Ok(lines)
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("luai=info".parse().expect("static directive")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(lines) => {
            for line in lines {
                println!("{}", line);
            }
        }
        Err(e) => {
            eprintln!("luai: {}", e);
            process::exit(1);
        }
    }
}
