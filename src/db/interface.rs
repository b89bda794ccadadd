//
// Copyright (c) 2020-2021 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

use std::path::PathBuf;
use std::process::Command;

use anyhow::anyhow;
use anyhow::Context;
use anyhow::Error;
use anyhow::Result;
use clap::ArgMatches;
use log::info;

use crate::config::Configuration;

pub fn interface(matches: &ArgMatches, config: &Configuration) -> Result<()> {
    match matches.subcommand() {
        Some(("cli", matches)) => cli(matches, config),
        Some((other, _)) => Err(anyhow!("Unknown subcommand: {}", other)),
        None => Err(anyhow!("No subcommand")),
    }
}

/// Drops the operator into an interactive `psql`/`pgcli` session against the
/// read-write database, preferred to a bespoke admin CLI.
fn cli(matches: &ArgMatches, config: &Configuration) -> Result<()> {
    trait PgCliCommand {
        fn run_for_uri(&self, uri: &str) -> Result<()>;
    }

    struct Psql(PathBuf);
    impl PgCliCommand for Psql {
        fn run_for_uri(&self, uri: &str) -> Result<()> {
            Command::new(&self.0)
                .arg(uri)
                .stdin(std::process::Stdio::inherit())
                .stdout(std::process::Stdio::inherit())
                .stderr(std::process::Stdio::inherit())
                .output()
                .map_err(Error::from)
                .and_then(report_outcome)
        }
    }

    struct PgCli(PathBuf);
    impl PgCliCommand for PgCli {
        fn run_for_uri(&self, uri: &str) -> Result<()> {
            Command::new(&self.0)
                .arg(uri)
                .stdin(std::process::Stdio::inherit())
                .stdout(std::process::Stdio::inherit())
                .stderr(std::process::Stdio::inherit())
                .output()
                .map_err(Error::from)
                .and_then(report_outcome)
        }
    }

    fn report_outcome(out: std::process::Output) -> Result<()> {
        if out.status.success() {
            info!("pg CLI session exited successfully");
            Ok(())
        } else {
            Err(anyhow!("pg CLI session did not exit successfully")).with_context(|| match String::from_utf8(out.stderr) {
                Ok(log) => anyhow!("{}", log),
                Err(e) => anyhow!("Cannot parse log into valid UTF-8: {}", e),
            })
        }
    }

    matches
        .value_of("tool")
        .map(|s| vec![s])
        .unwrap_or_else(|| vec!["psql", "pgcli"])
        .into_iter()
        .filter_map(|s| which::which(s).ok().map(|path| (path, s)))
        .map(|(path, s)| match s {
            "psql" => Ok(Box::new(Psql(path)) as Box<dyn PgCliCommand>),
            "pgcli" => Ok(Box::new(PgCli(path)) as Box<dyn PgCliCommand>),
            prog => Err(anyhow!("Unsupported pg CLI program: {}", prog)),
        })
        .next()
        .transpose()?
        .ok_or_else(|| anyhow!("No pg CLI program found (looked for psql, pgcli)"))?
        .run_for_uri(config.db_url_rw())
}
