#[macro_use]
extern crate clap;

use std::fs;
use std::mem;
use std::process;
use std::time;

use libc::{getrusage, rusage, RUSAGE_SELF};

use dstrsort::comm::{run_cluster, warmup, Communicator};
use dstrsort::measure::{MeasuringSink, NoSink, StderrSink};
use dstrsort::{DefaultMergeSort, Origin, StringContainer, Subcommunicators, Untracked};
use dstrsort::sample::UniformSampling;
use dstrsort::space_efficient::SpaceEfficientSort;

fn main() {
    let matches = clap_app!(dstrsort =>
        (about: "distributed string sorting test on a shared-memory cluster")
        (@arg PES: -p --pes +takes_value "number of PEs (default 4)")
        (@arg TIMES: -t --times +takes_value "repeat multiple times")
        (@arg CHECK: -c --check "check the sorted output")
        (@arg SPACE: -s --space "space-efficient sort (permutation only)")
        (@arg QUANTILE: -q --quantile +takes_value "quantile size in bytes for -s (default 1 MiB)")
        (@arg VERBOSE: -v --verbose "per-PE phase timings on stderr")
        (@arg INPUT: +required "newline-separated strings to sort")
    )
    .get_matches();

    let input_file = matches.value_of("INPUT").unwrap();
    let pes = parse_or(&matches, "PES", 4).max(1);
    let repeat_times = parse_or(&matches, "TIMES", 1).max(1);
    let quantile_size = parse_or(&matches, "QUANTILE", 1 << 20).max(1);
    let check_output = matches.is_present("CHECK");
    let space_efficient = matches.is_present("SPACE");
    let verbose = matches.is_present("VERBOSE");

    let data = match fs::read(input_file) {
        Ok(data) => data,
        Err(err) => {
            eprintln!("error: {:?}", err);
            process::exit(1);
        }
    };
    let lines: Vec<Vec<u8>> = data
        .split(|&b| b == b'\n')
        .filter(|l| !l.is_empty())
        .map(|l| l.to_vec())
        .collect();
    eprintln!(
        "load {} strings ({} bytes) from `{}`",
        lines.len(),
        data.len(),
        input_file
    );

    let mut times = String::new();
    for _ in 0..repeat_times {
        let ((), dur) = timeit(|| {
            if space_efficient {
                run_space_efficient(pes, &lines, quantile_size, verbose);
            } else {
                run_merge_sort(pes, &lines, check_output, verbose);
            }
        });
        times.push_str(format!("{:.3}s ", dur.as_secs_f64()).as_str());
    }
    eprintln!(" time: {}", times);
    eprintln!("  rss: {:.3}MiB", get_peak_rss_kib() as f64 / 1024.0);
}

fn make_sink(rank: usize, verbose: bool) -> Box<dyn MeasuringSink> {
    if verbose {
        Box::new(StderrSink::new(rank))
    } else {
        Box::new(NoSink)
    }
}

fn run_merge_sort(pes: usize, lines: &[Vec<u8>], check_output: bool, verbose: bool) {
    let out = run_cluster(pes, |comm| {
        warmup(&comm);
        let mut sink = make_sink(comm.rank(), verbose);
        let mut container =
            StringContainer::<Untracked>::from_strings(slice_for(lines, comm.rank(), comm.size()));
        let comms = Subcommunicators::single_level(comm);
        DefaultMergeSort::default().sort(&mut container, &comms, sink.as_mut());
        (0..container.len())
            .map(|i| container.str_bytes(i).to_vec())
            .collect::<Vec<_>>()
    });

    if check_output {
        let flat: Vec<Vec<u8>> = out.into_iter().flatten().collect();
        let mut expected: Vec<Vec<u8>> = lines.to_vec();
        expected.sort();
        eprintln!("check: {}", flat == expected);
    }
}

fn run_space_efficient(pes: usize, lines: &[Vec<u8>], quantile_size: usize, verbose: bool) {
    let out = run_cluster(pes, |comm| {
        warmup(&comm);
        let mut sink = make_sink(comm.rank(), verbose);
        let mut container =
            StringContainer::<Origin>::from_strings(slice_for(lines, comm.rank(), comm.size()));
        let comms = Subcommunicators::single_level(comm);
        let sorter = SpaceEfficientSort::new(
            UniformSampling::default(),
            DefaultMergeSort::default(),
            quantile_size,
        );
        let permutation = sorter.sort(&mut container, &comms, sink.as_mut());
        permutation.len()
    });
    eprintln!("permutation entries per PE: {:?}", out);
}

fn slice_for(lines: &[Vec<u8>], rank: usize, size: usize) -> &[Vec<u8>] {
    let per_pe = (lines.len() + size - 1) / size.max(1);
    let start = Ord::min(rank * per_pe, lines.len());
    let end = Ord::min(start + per_pe, lines.len());
    &lines[start..end]
}

fn parse_or(matches: &clap::ArgMatches, name: &str, default: usize) -> usize {
    matches
        .value_of(name)
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(default)
}

fn timeit<F, T>(f: F) -> (T, time::Duration)
where
    F: FnOnce() -> T,
{
    let start = time::Instant::now();
    let ret = f();
    let dur = start.elapsed();
    (ret, dur)
}

fn get_peak_rss_kib() -> u64 {
    let mut ru;
    unsafe {
        ru = mem::zeroed::<rusage>();
        getrusage(RUSAGE_SELF, &mut ru as *mut rusage);
    }
    ru.ru_maxrss as u64
}
