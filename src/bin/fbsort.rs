use std::process;

use clap::Parser;

use binsort_rs::common::reset_sigpipe;
use binsort_rs::sort::{print_usage, sort_file, Arguments, SortError};

#[derive(Parser)]
#[command(
    name = "fbsort",
    about = "Sort binary files of fixed-length records by composite keys",
    override_usage = "fbsort <input> <output> / sort(<spec>) record(<R>) [thread_count(<T>)]"
)]
struct Cli {
    /// Input file, output file, the literal '/', and parameters.
    #[arg(required = true, num_args = 1.., value_name = "ARGS")]
    args: Vec<String>,
}

fn main() {
    reset_sigpipe();
    let cli = Cli::parse();

    let args = match Arguments::parse(&cli.args) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("fbsort: {}", e);
            print_usage("fbsort");
            process::exit(2);
        }
    };

    println!("Binary Record Sort");
    println!("==================");
    println!("Input:        {}", args.input);
    println!("Output:       {}", args.output);
    println!("Record size:  {} bytes", args.record_length);
    println!("Keys:         {}", args.keys.len());
    println!("Threads:      {}", args.thread_count);

    let stats = match sort_file(&args) {
        Ok(s) => s,
        Err(e @ SortError::Argument(_)) | Err(e @ SortError::Key(_)) => {
            eprintln!("fbsort: {}", e);
            print_usage("fbsort");
            process::exit(2);
        }
        Err(e) => {
            eprintln!("fbsort: {}", e);
            process::exit(1);
        }
    };

    println!("Records:      {}", stats.records);
    if let Some(copy) = stats.copy_time {
        println!("Copied in     {} ms", copy.as_millis());
    }
    println!("Sorted in     {} ms", stats.sort_time.as_millis());

    let seconds = stats.sort_time.as_secs_f64();
    if seconds > 0.0 && stats.bytes > 0 {
        let mb_per_sec = (stats.bytes as f64 / (1024.0 * 1024.0)) / seconds;
        println!("Throughput:   {:.2} MB/s", mb_per_sec);
    }
}
