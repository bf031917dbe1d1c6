//! Build script: render the ddbusd(1) man page for packaging.

use std::error::Error;
use std::path::{Path, PathBuf};
use std::{env, fs, io};

use time::{OffsetDateTime, format_description::well_known::Iso8601};

const FALLBACK_DATE: &str = "1970-01-01";

/// Resolves the page date from `SOURCE_DATE_EPOCH` for reproducible builds.
fn manual_date() -> String {
    let Ok(raw) = env::var("SOURCE_DATE_EPOCH") else {
        return FALLBACK_DATE.into();
    };
    let formatted = raw
        .parse::<i64>()
        .ok()
        .and_then(|seconds| OffsetDateTime::from_unix_timestamp(seconds).ok())
        .and_then(|moment| moment.format(&Iso8601::DATE).ok());
    formatted.unwrap_or_else(|| {
        println!(
            "cargo:warning=Ignoring SOURCE_DATE_EPOCH '{raw}'; expected integer seconds since \
             the Unix epoch; using {FALLBACK_DATE}"
        );
        FALLBACK_DATE.into()
    })
}

fn render_page(name: &str, version: &str, date: &str) -> String {
    let title = name.to_uppercase();
    format!(
        ".TH \"{title}\" \"1\" \"{date}\" \"{name} {version}\" \"Diagnostic Bus Listener\"\n\
.SH NAME\n\
{name} \\- diagnostic message bus listener\n\
.SH SYNOPSIS\n\
.B {name}\n\
[\\fB\\-\\-listen\\-socket\\fR \\fIURL\\fR]\n\
[\\fB\\-\\-relay\\-socket\\fR \\fIURL\\fR]\n\
[\\fB\\-\\-relay\\-upstream\\fR \\fIURL\\fR]\n\
.SH DESCRIPTION\n\
{name} lets diagnostic tools register as clients, exchange messages and\n\
query URI services such as \\fBlistener/clients\\fR over JSON Lines sockets.\n\
With \\fB\\-\\-relay\\-upstream\\fR it runs as a relay that forwards local\n\
tools to another listener.\n\
.SH ENVIRONMENT\n\
.TP\n\
.B DDBUS_*\n\
Override any configuration field, for example \\fBDDBUS_LISTEN_SOCKET\\fR.\n\
.TP\n\
.B DDBUS_FOREGROUND\n\
Stay attached to the terminal instead of daemonising.\n\
.SH FILES\n\
.TP\n\
.I ddbusd.lock, ddbusd.pid, ddbusd.health, ddbusd.log\n\
Runtime files written beside a Unix listen socket and named after it.\n\
TCP listeners write \\fIddbusd\\-PORT\\fR files to a shared runtime directory.\n"
    )
}

/// Workspace `target` directory, four levels above `OUT_DIR`.
fn workspace_target_dir() -> Option<PathBuf> {
    let out_dir = PathBuf::from(env::var_os("OUT_DIR")?);
    out_dir.ancestors().nth(4).map(Path::to_path_buf)
}

fn stage(dir: &Path, page_name: &str, page: &[u8]) -> io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let destination = dir.join(page_name);
    let staging = dir.join(format!("{page_name}.tmp"));
    fs::write(&staging, page)?;
    fs::rename(&staging, &destination)?;
    Ok(destination)
}

fn main() -> Result<(), Box<dyn Error>> {
    for variable in [
        "CARGO_PKG_VERSION",
        "CARGO_BIN_NAME",
        "SOURCE_DATE_EPOCH",
        "TARGET",
        "PROFILE",
    ] {
        println!("cargo:rerun-if-env-changed={variable}");
    }

    let name = env::var("CARGO_BIN_NAME")
        .or_else(|_| env::var("CARGO_PKG_NAME"))
        .unwrap_or_else(|_| "ddbusd".into());
    let version = env::var("CARGO_PKG_VERSION")
        .map_err(|_| "CARGO_PKG_VERSION must be set by Cargo to render the manual page")?;
    let page = render_page(&name, &version, &manual_date());
    let page_name = format!("{name}.1");

    let target = env::var("TARGET").unwrap_or_else(|_| "unknown-target".into());
    let profile = env::var("PROFILE").unwrap_or_else(|_| "unknown-profile".into());
    let packaged = workspace_target_dir()
        .unwrap_or_else(|| PathBuf::from("target"))
        .join("generated-man")
        .join(target)
        .join(profile);
    stage(&packaged, &page_name, page.as_bytes())?;

    if let Some(out_dir) = env::var_os("OUT_DIR").map(PathBuf::from)
        && let Err(error) = stage(&out_dir, &page_name, page.as_bytes())
    {
        println!(
            "cargo:warning=Failed to stage manual page in OUT_DIR ({}): {error}",
            out_dir.display()
        );
    }
    Ok(())
}
