use serde::{Serialize, Serializer};
use simpleperf_record::{Record, RecordFileReader};

fn serialize_address_as_hex<S>(addr: &u64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format!("0x{:x}", addr))
}

#[derive(Debug, Serialize)]
struct Thread {
    pid: u32,
    tid: u32,
    name: String,
}

#[derive(Debug, Serialize)]
struct Mapping {
    pid: u32,
    #[serde(serialize_with = "serialize_address_as_hex")]
    start: u64,
    len: u64,
    pgoff: u64,
    path: String,
}

#[derive(Debug, Serialize)]
struct Sample {
    event: String,
    time: Option<u64>,
    pid: Option<u32>,
    tid: Option<u32>,
    cpu: Option<u32>,
    #[serde(serialize_with = "serialize_address_as_hex")]
    ip: u64,
    period: Option<u64>,
    callchain: Vec<String>,
}

#[derive(Debug, Serialize)]
struct OutputData {
    events: Vec<String>,
    hostname: Option<String>,
    threads: Vec<Thread>,
    mappings: Vec<Mapping>,
    samples: Vec<Sample>,
    lost: u64,
}

fn main() {
    let mut args = std::env::args().skip(1);
    let path = args
        .next()
        .expect("Usage: record_to_json <perf.data> [output.json]");
    let output_path = args.next();

    let mut reader = RecordFileReader::open(&path).unwrap();
    let events: Vec<String> = reader
        .file()
        .event_attributes()
        .iter()
        .enumerate()
        .map(|(i, a)| a.name().map_or_else(|| format!("event{i}"), str::to_string))
        .collect();
    let mut output = OutputData {
        events: events.clone(),
        hostname: reader.file().hostname().unwrap().map(str::to_string),
        threads: Vec::new(),
        mappings: Vec::new(),
        samples: Vec::new(),
        lost: 0,
    };

    while let Some(file_record) = reader.next_sorted_record().unwrap() {
        match file_record.record {
            Record::Comm(r) => output.threads.push(Thread {
                pid: r.pid,
                tid: r.tid,
                name: String::from_utf8_lossy(&r.comm).into_owned(),
            }),
            Record::Mmap(r) => output.mappings.push(Mapping {
                pid: r.pid,
                start: r.addr,
                len: r.len,
                pgoff: r.pgoff,
                path: String::from_utf8_lossy(&r.filename).into_owned(),
            }),
            Record::Mmap2(r) => output.mappings.push(Mapping {
                pid: r.pid,
                start: r.addr,
                len: r.len,
                pgoff: r.pgoff,
                path: String::from_utf8_lossy(&r.filename).into_owned(),
            }),
            Record::Sample(s) => output.samples.push(Sample {
                event: events[file_record.attr_index.unwrap_or(0)].clone(),
                time: s.time,
                pid: s.pid,
                tid: s.tid,
                cpu: s.cpu,
                ip: s.ip.unwrap_or(0),
                period: s.period,
                callchain: s
                    .callchain
                    .unwrap_or_default()
                    .iter()
                    .map(|addr| format!("0x{addr:x}"))
                    .collect(),
            }),
            Record::Lost(r) => output.lost += r.lost,
            _ => {}
        }
    }

    let json = serde_json::to_string_pretty(&output).unwrap();
    match output_path {
        Some(output_path) => std::fs::write(output_path, json).unwrap(),
        None => println!("{json}"),
    }
}
