//
// Copyright (c) 2020-2021 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

use clap::crate_authors;
use clap::crate_version;
use clap::App;
use clap::Arg;

pub fn cli<'a>() -> App<'a> {
    App::new("conveyor")
        .author(crate_authors!())
        .version(crate_version!())
        .about("Multi-tenant ETL execution substrate: scheduler, orchestrator and worker pool for issue-tracker/SCM extraction and embedding")

        .arg(Arg::new("hide_bars").required(false).multiple(false).long("hide-bars").about("Hide all progress bars"))

        .subcommand(App::new("generate-completions")
            .about("Generate and print commandline completions")
            .arg(Arg::new("shell")
                .possible_values(&["bash", "elvish", "fish", "zsh"])
                .default_value("bash")
                .required(true)
                .multiple(false)
                .about("Shell to generate completions for")
            )
        )

        .subcommand(App::new("db")
            .about("Database CLI interface")
            .subcommand(App::new("cli")
                .about("Start a database CLI, if installed on the current host")
                .long_about(indoc::indoc!(r#"
                    Starts a database shell on the configured read-write database using one of
                    the following programs:
                        - psql
                        - pgcli

                    if installed.
                "#))
                .arg(Arg::new("tool")
                    .required(false)
                    .multiple(false)
                    .long("tool")
                    .value_name("TOOL")
                    .possible_values(&["psql", "pgcli"])
                    .about("Use a specific tool")
                )
            )
        )

        .subcommand(App::new("run-job")
            .about("Force a job to run now, respecting single-flight")
            .arg(Arg::new("tenant_id").required(true).multiple(false).index(1).value_name("TENANT_ID"))
            .arg(Arg::new("job_name").required(true).multiple(false).index(2).value_name("JOB_NAME"))
        )

        .subcommand(App::new("cancel-job")
            .about("Set the cancellation flag for a running job")
            .arg(Arg::new("tenant_id").required(true).multiple(false).index(1).value_name("TENANT_ID"))
            .arg(Arg::new("job_name").required(true).multiple(false).index(2).value_name("JOB_NAME"))
        )

        .subcommand(App::new("status")
            .about("Print the canonical status document for a job")
            .arg(Arg::new("tenant_id").required(true).multiple(false).index(1).value_name("TENANT_ID"))
            .arg(Arg::new("job_name").required(true).multiple(false).index(2).value_name("JOB_NAME"))
        )

        .subcommand(App::new("requeue-pending-raw")
            .about("Republish transform messages for raw records still pending")
            .arg(Arg::new("tenant_id").required(true).multiple(false).index(1).value_name("TENANT_ID"))
            .arg(Arg::new("limit")
                .required(false)
                .multiple(false)
                .long("limit")
                .value_name("N")
                .about("Maximum number of raw records to republish (default: all pending)")
            )
        )

        .subcommand(App::new("worker")
            .about("Worker pool lifecycle operations")
            .subcommand(App::new("start")
                .about("Start workers for a tenant, or every tenant with --all")
                .arg(Arg::new("tenant_id").required(false).multiple(false).index(1).value_name("TENANT_ID").conflicts_with("all"))
                .arg(Arg::new("all").required(false).multiple(false).long("all").about("Start workers for every tenant"))
            )
            .subcommand(App::new("stop")
                .about("Stop workers for a tenant, or every tenant with --all")
                .arg(Arg::new("tenant_id").required(false).multiple(false).index(1).value_name("TENANT_ID").conflicts_with("all"))
                .arg(Arg::new("all").required(false).multiple(false).long("all").about("Stop workers for every tenant"))
            )
            .subcommand(App::new("status").about("Print running/active-count/last-heartbeat per (tenant, stage)"))
        )

        .subcommand(App::new("scheduler")
            .about("Job scheduler supervisor")
            .subcommand(App::new("run").about("Run the scheduler supervisor in the foreground until interrupted"))
        )
}

#[cfg(test)]
mod tests {
    use super::cli;

    #[test]
    fn cli_builds_without_panicking() {
        cli().debug_assert();
    }

    #[test]
    fn run_job_requires_tenant_and_job_name() {
        let matches = cli().try_get_matches_from(vec!["conveyor", "run-job", "1", "jira-sync"]);
        assert!(matches.is_ok());
    }

    #[test]
    fn run_job_rejects_missing_job_name() {
        let matches = cli().try_get_matches_from(vec!["conveyor", "run-job", "1"]);
        assert!(matches.is_err());
    }
}
