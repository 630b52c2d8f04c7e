mod common;

use std::{
    fs::File,
    io::{Read, Write},
    process::{Output, Stdio},
};

use anyhow::Context;
use bon::Builder;
use escargot::CargoBuild;
use futures_util::io::Cursor;
use tempfile::NamedTempFile;

use common::{parse, Fixture};
use mp4_repair::{write_rebuilt, Mp4Writer};

#[derive(Builder)]
struct ExampleTestCase {
    #[builder(default = "mp4repair")]
    example: &'static str,
    command: &'static str,
    #[builder(default = Vec::new())]
    additional_args: Vec<&'static str>,
    /// Write the rebuilt file to stdout instead of a temp file
    #[builder(default = false)]
    stdout: bool,
    /// Pass an output path after the subcommand
    #[builder(default = true)]
    writes_output: bool,
}

struct ExampleRun {
    output: Output,
    written: Vec<u8>,
}

fn input_file() -> anyhow::Result<NamedTempFile> {
    let movie = Fixture::builder().build().build();
    let mut file = NamedTempFile::new().context("error creating input temp file")?;
    file.write_all(&movie.bytes)
        .context("error writing input temp file")?;
    Ok(file)
}

fn run_example(test_case: ExampleTestCase) -> anyhow::Result<ExampleRun> {
    let input = input_file()?;
    let output_file = NamedTempFile::new().context("error creating output temp file")?;
    let output_path = if test_case.stdout {
        "-".to_string()
    } else {
        output_file
            .path()
            .to_str()
            .context("temp path is not utf-8")?
            .to_string()
    };

    let mut command = CargoBuild::new()
        .example(test_case.example)
        .run()
        .context("error building example")?
        .command();
    command
        .arg(input.path())
        .arg(test_case.command)
        .stdin(Stdio::null());
    if test_case.writes_output {
        command.arg(&output_path);
    }
    command.args(test_case.additional_args);
    let output = command.output().context("failed to run example")?;

    let written = if test_case.stdout {
        output.stdout.clone()
    } else {
        let mut written = Vec::new();
        File::open(output_file.path())
            .context("error opening output file")?
            .read_to_end(&mut written)
            .context("error reading output file")?;
        written
    };
    Ok(ExampleRun { output, written })
}

/// Rebuilds the fixture in process, keeping `frames` when given.
async fn expected_output(frames: Option<(u32, u32)>) -> Vec<u8> {
    let movie = Fixture::builder().build().build();
    let (mut parser, parsed) = parse(movie.bytes).await;
    let rebuilt = match frames {
        Some((start, end)) => parser.cut_frames(&parsed, start, end).await,
        None => parser.rebuild(&parsed, None, None).await,
    }
    .expect("rebuild");
    let config = parser.config().clone();
    let mut writer = Mp4Writer::new(Cursor::new(Vec::new()));
    write_rebuilt(parser.reader_mut(), &rebuilt, &mut writer, &config)
        .await
        .expect("write rebuilt file");
    writer.into_inner().into_inner()
}

macro_rules! test_example {
    ($(
        $name:ident {
            $( $field:ident: $value:expr ),+ $(,)?
        } => $frames:expr;
    )*) => {
        $(
            #[tokio::test]
            async fn $name() {
                let test_case = ExampleTestCase::builder()
                    .$( $field($value) ).+
                    .build();
                let run = run_example(test_case).expect("example run");
                assert!(
                    run.output.status.success(),
                    "example failed: {}",
                    String::from_utf8_lossy(&run.output.stderr)
                );
                assert!(run.written == expected_output($frames).await, "output differs");
            }
        )*
    };
}

test_example!(
    mp4repair_repair_to_file {
        command: "repair",
    } => None;
    mp4repair_repair_to_stdout {
        command: "repair",
        stdout: true,
    } => None;
    mp4repair_cut_frames {
        command: "cut",
        additional_args: vec!["--start-frame", "15", "--end-frame", "45"],
    } => Some((15, 45));
    mp4repair_cut_time {
        command: "cut",
        additional_args: vec!["--from", "0.5", "--to", "1.5"],
    } => Some((16, 46));
);

#[test]
fn mp4repair_info() {
    let run = run_example(
        ExampleTestCase::builder()
            .command("info")
            .writes_output(false)
            .build(),
    )
    .expect("example run");
    assert!(run.output.status.success());
    let stdout = String::from_utf8_lossy(&run.output.stdout);
    assert!(stdout.contains("frames:      60"), "{stdout}");
    assert!(stdout.contains("video:       avc1 320x240"), "{stdout}");
}

#[test]
fn mp4repair_frame_out_of_range() {
    let run = run_example(
        ExampleTestCase::builder()
            .command("frame")
            .writes_output(false)
            .additional_args(vec!["--index", "61"])
            .build(),
    )
    .expect("example run");
    assert!(!run.output.status.success());
    let stderr = String::from_utf8_lossy(&run.output.stderr);
    assert!(stderr.contains("outside the range"), "{stderr}");
}
