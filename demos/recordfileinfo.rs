use std::collections::HashMap;

use simpleperf_record::constants::*;
use simpleperf_record::{Record, RecordFileReader};

fn record_type_name(record_type: u32) -> String {
    let name = match record_type {
        PERF_RECORD_MMAP => "MMAP",
        PERF_RECORD_LOST => "LOST",
        PERF_RECORD_COMM => "COMM",
        PERF_RECORD_EXIT => "EXIT",
        PERF_RECORD_THROTTLE => "THROTTLE",
        PERF_RECORD_UNTHROTTLE => "UNTHROTTLE",
        PERF_RECORD_FORK => "FORK",
        PERF_RECORD_SAMPLE => "SAMPLE",
        PERF_RECORD_MMAP2 => "MMAP2",
        PERF_RECORD_AUXTRACE => "AUXTRACE",
        PERF_RECORD_FINISHED_ROUND => "FINISHED_ROUND",
        SIMPLE_PERF_RECORD_TRACING_DATA => "TRACING_DATA",
        _ => return format!("type {record_type}"),
    };
    name.to_string()
}

fn main() {
    let path = std::env::args()
        .nth(1)
        .expect("Usage: recordfileinfo <perf.data>");
    let mut reader = match RecordFileReader::open(&path) {
        Ok(reader) => reader,
        Err(e) => {
            println!("ERROR when opening {path}: {e}");
            return;
        }
    };

    let file = reader.file();
    if let Ok(Some(hostname)) = file.hostname() {
        println!("Hostname: {hostname}");
    }
    if let Ok(Some(os_release)) = file.os_release() {
        println!("OS release: {os_release}");
    }
    if let Ok(Some(arch)) = file.arch() {
        println!("Arch: {arch}");
    }
    if let Ok(Some(nr_cpus)) = file.nr_cpus() {
        println!(
            "CPUs: {} online, {} available",
            nr_cpus.nr_cpus_online, nr_cpus.nr_cpus_available
        );
    }
    if let Ok(Some(cmdline)) = file.cmdline() {
        println!("CmdLine: {cmdline:?}");
    }

    let features: String = file
        .features()
        .iter()
        .map(|f| format!("{f}"))
        .collect::<Vec<_>>()
        .join(", ");
    println!("Features: {features}");
    println!();

    if let Ok(Some(meta_info)) = file.simpleperf_meta_info() {
        println!("Simpleperf meta info:");
        let mut meta_info: Vec<_> = meta_info.into_iter().collect();
        meta_info.sort();
        for (k, v) in meta_info {
            println!("  {k}: {v}");
        }
        println!();
    }
    if let Ok(build_ids) = file.build_ids() {
        if !build_ids.is_empty() {
            println!("Build ids:");
            for b in &build_ids {
                let id: String = b.build_id.iter().map(|b| format!("{b:02x}")).collect();
                println!("  {id} {}", String::from_utf8_lossy(&b.filename));
            }
            println!();
        }
    }

    let event_names: Vec<String> = file
        .event_attributes()
        .iter()
        .map(|a| a.name().unwrap_or("<no event name found>").to_string())
        .collect();

    let mut event_record_map: HashMap<usize, HashMap<u32, u64>> = HashMap::new();
    let mut user_record_map: HashMap<u32, u64> = HashMap::new();
    let mut lost = 0;
    loop {
        let file_record = match reader.next_record() {
            Ok(Some(file_record)) => file_record,
            Ok(None) => break,
            Err(e) => {
                println!("ERROR when reading records: {e}");
                break;
            }
        };
        if let Record::Lost(r) = &file_record.record {
            lost += r.lost;
        }
        let record_type = file_record.record.record_type();
        match file_record.attr_index {
            Some(attr_index) => {
                *event_record_map
                    .entry(attr_index)
                    .or_default()
                    .entry(record_type)
                    .or_insert(0) += 1
            }
            None => *user_record_map.entry(record_type).or_insert(0) += 1,
        }
    }

    let mut event_record_map: Vec<_> = event_record_map
        .into_iter()
        .map(|(attr_index, histogram)| {
            let sum = histogram.values().sum::<u64>();
            (attr_index, histogram, sum)
        })
        .collect();
    event_record_map.sort_by_key(|(_attr_index, _histogram, sum)| -(*sum as i64));
    let sum = event_record_map
        .iter()
        .map(|(_attr_index, _histogram, sum)| sum)
        .sum::<u64>();

    println!("Event records: {sum} records, {lost} lost");
    println!();
    for (attr_index, histogram, sum) in event_record_map {
        let mut histogram: Vec<_> = histogram.into_iter().collect();
        histogram.sort_by_key(|(_record_type, count)| -(*count as i64));
        println!(
            "  event {} ({}): {} records",
            attr_index, event_names[attr_index], sum
        );
        for (record_type, count) in histogram {
            println!("    {}: {}", record_type_name(record_type), count);
        }
        println!();
    }

    let mut user_record_map: Vec<_> = user_record_map.into_iter().collect();
    user_record_map.sort_by_key(|(_record_type, count)| -(*count as i64));
    let sum = user_record_map.iter().map(|(_, count)| count).sum::<u64>();
    println!("User records: {sum} records");
    println!();
    for (record_type, count) in user_record_map {
        println!("  {}: {}", record_type_name(record_type), count);
    }
}
