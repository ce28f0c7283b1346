use std::time::Duration;

use simpleperf_record::{EventTypeRegistry, RecordOptions, RecordSession, SamplingPolicy};

const USAGE: &str =
    "Usage: record [-o perf.data] [-e event[,event...]] [-c period | -f freq] [-g] [--duration secs] [-- command args...]";

fn value(args: &mut impl Iterator<Item = String>) -> String {
    args.next().expect(USAGE)
}

fn main() {
    env_logger::init();

    let mut output = "perf.data".to_string();
    let mut options = RecordOptions::default();
    let mut workload = Vec::new();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-o" => output = value(&mut args),
            "-e" => {
                let events = value(&mut args);
                let events: Vec<&str> = events.split(',').collect();
                options = options.events(&events);
            }
            "-c" => {
                let period = value(&mut args).parse().expect(USAGE);
                options = options.sampling_policy(SamplingPolicy::Period(period));
            }
            "-f" => {
                let freq = value(&mut args).parse().expect(USAGE);
                options = options.sampling_policy(SamplingPolicy::Frequency(freq));
            }
            "-g" => options = options.call_graph(true),
            "--duration" => {
                let secs: f64 = value(&mut args).parse().expect(USAGE);
                options = options.duration(Duration::from_secs_f64(secs));
            }
            "--" => {
                workload.extend(args.by_ref());
            }
            _ => {
                eprintln!("{USAGE}");
                std::process::exit(1);
            }
        }
    }
    if workload.is_empty() && options.duration.is_none() {
        eprintln!("Either a command or --duration is needed.\n{USAGE}");
        std::process::exit(1);
    }

    let session = match RecordSession::new(options, &EventTypeRegistry::builtin()) {
        Ok(session) => session.workload(&workload),
        Err(e) => {
            eprintln!("ERROR: {e}");
            std::process::exit(1);
        }
    };
    match session.record(&output) {
        Ok(summary) => {
            println!(
                "Wrote {} records ({} samples, {} lost) to {output}",
                summary.record_count, summary.sample_count, summary.lost_count
            );
            if summary.forced_flushes > 0 {
                println!(
                    "{} records were written before all ring buffers were drained",
                    summary.forced_flushes
                );
            }
            if let Some(code) = summary.workload_exit_code {
                std::process::exit(code);
            }
        }
        Err(e) => {
            eprintln!("ERROR: {e}");
            std::process::exit(1);
        }
    }
}
