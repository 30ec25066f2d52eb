//! autoff CLI - desktop entry point for checking templates and colours
//!
//! Runs the perception engine against saved screenshots, so reference
//! images and regions can be tuned without an emulator attached.

use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use autoff::game::catalog;
use autoff::vision::{
    compare_color_at, feature_match, get_hsv_at, template_match, FeatureParams, Found, Point,
    ReferenceImage, TemplateParams,
};
use autoff::{Frame, Rect};

#[derive(Debug)]
enum Command {
    Match(MatchArgs),
    Color {
        frame: PathBuf,
        point: Point,
        spec: String,
    },
    Catalog,
}

#[derive(Debug)]
struct MatchArgs {
    frame: PathBuf,
    template: PathBuf,
    region: Option<Rect>,
    feature: bool,
    threshold: Option<f32>,
    all: bool,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().skip(1).collect();
    let command = match parse(&args) {
        Ok(Some(command)) => command,
        Ok(None) => {
            print_help();
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            eprintln!("{}", e);
            print_help();
            return ExitCode::FAILURE;
        }
    };

    match run(command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn parse(args: &[String]) -> Result<Option<Command>, String> {
    let Some((name, rest)) = args.split_first() else {
        return Ok(None);
    };

    let mut frame = None;
    let mut template = None;
    let mut region = None;
    let mut feature = false;
    let mut threshold = None;
    let mut all = false;
    let mut point = None;
    let mut spec = None;

    let mut iter = rest.iter();
    while let Some(arg) = iter.next() {
        let mut value = || {
            iter.next()
                .cloned()
                .ok_or_else(|| format!("{} needs a value", arg))
        };
        match arg.as_str() {
            "--help" | "-h" => return Ok(None),
            "--frame" => frame = Some(PathBuf::from(value()?)),
            "--template" => template = Some(PathBuf::from(value()?)),
            "--region" => region = Some(parse_rect(&value()?)?),
            "--method" => {
                feature = match value()?.as_str() {
                    "template" => false,
                    "feature" => true,
                    other => return Err(format!("Unknown method: {}", other)),
                }
            }
            "--threshold" => {
                let v = value()?;
                threshold = Some(v.parse().map_err(|_| format!("Invalid threshold: {}", v))?);
            }
            "--all" => all = true,
            "--point" => point = Some(parse_point(&value()?)?),
            "--spec" => spec = Some(value()?),
            other => return Err(format!("Unknown argument: {}", other)),
        }
    }

    let command = match name.as_str() {
        "match" => Command::Match(MatchArgs {
            frame: frame.ok_or("match needs --frame")?,
            template: template.ok_or("match needs --template")?,
            region,
            feature,
            threshold,
            all,
        }),
        "color" => Command::Color {
            frame: frame.ok_or("color needs --frame")?,
            point: point.ok_or("color needs --point")?,
            spec: spec.ok_or("color needs --spec")?,
        },
        "catalog" => Command::Catalog,
        "--help" | "-h" | "help" => return Ok(None),
        other => return Err(format!("Unknown command: {}", other)),
    };
    Ok(Some(command))
}

fn numbers<T: std::str::FromStr>(s: &str, count: usize) -> Result<Vec<T>, String> {
    let values: Vec<T> = s
        .split(',')
        .map(|v| v.trim().parse::<T>())
        .collect::<Result<_, _>>()
        .map_err(|_| format!("Expected {} comma-separated numbers: {}", count, s))?;
    if values.len() != count {
        return Err(format!("Expected {} comma-separated numbers: {}", count, s));
    }
    Ok(values)
}

fn parse_rect(s: &str) -> Result<Rect, String> {
    let v = numbers::<u32>(s, 4)?;
    Ok(Rect::new(v[0], v[1], v[2], v[3]))
}

fn parse_point(s: &str) -> Result<Point, String> {
    let v = numbers::<i32>(s, 2)?;
    Ok((v[0], v[1]))
}

fn open_frame(path: &Path) -> Result<Frame, Box<dyn std::error::Error>> {
    Ok(image::open(path)?.to_rgba8())
}

fn run(command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Match(args) => {
            let frame = open_frame(&args.frame)?;
            let template = ReferenceImage::open(&args.template)?;
            let index = if args.all { -1 } else { 0 };
            log::info!(
                "Matching {} ({}x{}) in {}",
                template.name,
                template.dimensions().0,
                template.dimensions().1,
                args.frame.display()
            );

            let found = if args.feature {
                let mut params = FeatureParams {
                    region: args.region,
                    index,
                    ..FeatureParams::default()
                };
                if let Some(ratio) = args.threshold {
                    params.ratio = ratio;
                }
                feature_match(&frame, &template, &params)
            } else {
                let mut params = TemplateParams {
                    region: args.region,
                    index,
                    ..TemplateParams::default()
                };
                if let Some(threshold) = args.threshold {
                    params.threshold = threshold;
                }
                template_match(&frame, &template, &params)
            };

            let results = match found {
                Some(Found::One(result)) => vec![result],
                Some(Found::All(results)) => results,
                None => Vec::new(),
            };
            if results.is_empty() {
                println!("No match");
            }
            for result in results {
                println!("{}", serde_json::to_string(&result)?);
            }
        }
        Command::Color { frame, point, spec } => {
            let frame = open_frame(&frame)?;
            let matches = compare_color_at(&frame, point, &spec);
            match get_hsv_at(&frame, point) {
                Some(hsv) => println!(
                    "({}, {}) matches {}: {}  hsv {}",
                    point.0,
                    point.1,
                    spec,
                    matches,
                    serde_json::to_string(&hsv)?
                ),
                None => println!("({}, {}) is outside the frame", point.0, point.1),
            }
        }
        Command::Catalog => {
            for name in catalog::names() {
                if let Some(entry) = catalog::lookup(name) {
                    println!(
                        "{:<28} {:<9} lv{:<3} note {:<2} slot {}",
                        name,
                        entry.job.to_string(),
                        entry.level,
                        entry.note_index,
                        entry.gather_index
                    );
                }
            }
            println!("{} items", catalog::len());
        }
    }
    Ok(())
}

fn print_help() {
    println!("autoff - perception checks against saved screenshots");
    println!();
    println!("USAGE:");
    println!("    autoff match --frame <png> --template <png> [--region x,y,w,h]");
    println!("                 [--method template|feature] [--threshold f] [--all]");
    println!("    autoff color --frame <png> --point x,y --spec RRGGBB[-TTTTTT]");
    println!("    autoff catalog");
    println!();
    println!("Set RUST_LOG=debug for matcher diagnostics.");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(s: &str) -> Vec<String> {
        s.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn test_parse_match() {
        let command = parse(&args(
            "match --frame f.png --template t.png --region 1,2,3,4 --threshold 0.8 --all",
        ))
        .unwrap()
        .unwrap();
        match command {
            Command::Match(m) => {
                assert_eq!(m.region, Some(Rect::new(1, 2, 3, 4)));
                assert_eq!(m.threshold, Some(0.8));
                assert!(m.all);
                assert!(!m.feature);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_color() {
        let command = parse(&args("color --frame f.png --point 861,371 --spec fcd795-101010"))
            .unwrap()
            .unwrap();
        assert!(matches!(command, Command::Color { point: (861, 371), .. }));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse(&args("match --frame f.png")).is_err());
        assert!(parse(&args("match --frame f.png --template t.png --method sift")).is_err());
        assert!(parse(&args("color --frame f.png --point 1,2,3 --spec ffffff")).is_err());
        assert!(parse(&args("launch")).is_err());
        assert!(parse(&[]).unwrap().is_none());
    }
}
