//! Diagnostic figures and the per-run report document.
//!
//! Each report stage produces one [`Figure`]: the statistics it visualizes
//! plus an SVG rendering. Figures are collected in a caller-owned
//! [`FigureBook`] threaded explicitly through the pipeline, and written out
//! once at the end of the run as a single document with one page per figure
//! in insertion order.

use std::io::{self, Write};
use std::path::Path;

use plotters::prelude::*;
use thiserror::Error;

const FIGURE_WIDTH: u32 = 800;
const FIGURE_HEIGHT: u32 = 600;

#[derive(Debug, Error)]
pub enum FigureError {
    #[error("failed to render figure {title:?}: {message}")]
    Render { title: String, message: String },

    #[error("failed to write report document: {0}")]
    Write(#[from] io::Error),
}

/// The data behind one rendered figure.
#[derive(Debug, Clone)]
pub enum FigureData {
    /// Distribution of a per-row statistic, with an optional cutoff marker.
    Histogram {
        values: Vec<f64>,
        bins: usize,
        cutoff: Option<f64>,
    },
    /// Failure counts per QC criterion.
    Bar {
        categories: Vec<String>,
        counts: Vec<usize>,
    },
    /// Pairwise statistic scatter, e.g. Z0 vs pi-hat for related pairs.
    Scatter { points: Vec<(f64, f64)> },
}

/// One renderable diagnostic: the statistics plus their SVG rendering.
///
/// Ownership is transient; a report stage creates the figure, the pipeline
/// appends it to the run's [`FigureBook`], and the document writer consumes
/// it exactly once.
#[derive(Debug, Clone)]
pub struct Figure {
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub data: FigureData,
    svg: String,
}

impl Figure {
    pub fn new(
        title: impl Into<String>,
        x_label: impl Into<String>,
        y_label: impl Into<String>,
        data: FigureData,
    ) -> Result<Self, FigureError> {
        let title = title.into();
        let x_label = x_label.into();
        let y_label = y_label.into();

        let mut svg = String::new();
        render(&mut svg, &title, &x_label, &y_label, &data).map_err(|message| {
            FigureError::Render {
                title: title.clone(),
                message,
            }
        })?;

        Ok(Self {
            title,
            x_label,
            y_label,
            data,
            svg,
        })
    }

    pub fn svg(&self) -> &str {
        &self.svg
    }
}

fn render(
    out: &mut String,
    title: &str,
    x_label: &str,
    y_label: &str,
    data: &FigureData,
) -> Result<(), String> {
    let root = SVGBackend::with_string(out, (FIGURE_WIDTH, FIGURE_HEIGHT)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| e.to_string())?;

    match data {
        FigureData::Histogram {
            values,
            bins,
            cutoff,
        } => draw_histogram(&root, title, x_label, y_label, values, *bins, *cutoff),
        FigureData::Bar { categories, counts } => {
            draw_bar(&root, title, x_label, y_label, categories, counts)
        }
        FigureData::Scatter { points } => draw_scatter(&root, title, x_label, y_label, points),
    }
    .map_err(|e| e.to_string())?;

    root.present().map_err(|e| e.to_string())?;
    Ok(())
}

type DrawResult = Result<(), Box<dyn std::error::Error>>;

fn draw_histogram(
    root: &DrawingArea<SVGBackend, plotters::coord::Shift>,
    title: &str,
    x_label: &str,
    y_label: &str,
    values: &[f64],
    bins: usize,
    cutoff: Option<f64>,
) -> DrawResult {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    let (min, max) = finite
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let (min, max) = if finite.is_empty() || min == max {
        (min.min(0.0), max.max(1.0))
    } else {
        (min, max)
    };

    let bins = bins.max(1);
    let width = (max - min) / bins as f64;
    let mut counts = vec![0usize; bins];
    for &v in &finite {
        let idx = (((v - min) / width) as usize).min(bins - 1);
        counts[idx] += 1;
    }
    let y_max = counts.iter().copied().max().unwrap_or(0).max(1);

    let mut chart = ChartBuilder::on(root)
        .caption(title, ("sans-serif", 24))
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(min..max, 0usize..y_max + y_max / 10 + 1)?;

    chart
        .configure_mesh()
        .x_desc(x_label)
        .y_desc(y_label)
        .draw()?;

    chart.draw_series(counts.iter().enumerate().map(|(i, &count)| {
        let x0 = min + i as f64 * width;
        let x1 = x0 + width;
        Rectangle::new([(x0, 0), (x1, count)], BLUE.mix(0.5).filled())
    }))?;

    if let Some(cut) = cutoff {
        chart.draw_series(LineSeries::new(
            [(cut, 0), (cut, y_max)],
            RED.stroke_width(2),
        ))?;
    }

    Ok(())
}

fn draw_bar(
    root: &DrawingArea<SVGBackend, plotters::coord::Shift>,
    title: &str,
    x_label: &str,
    y_label: &str,
    categories: &[String],
    counts: &[usize],
) -> DrawResult {
    let y_max = counts.iter().copied().max().unwrap_or(0).max(1);
    let labels = categories.to_vec();

    let mut chart = ChartBuilder::on(root)
        .caption(title, ("sans-serif", 24))
        .margin(20)
        .x_label_area_size(80)
        .y_label_area_size(50)
        .build_cartesian_2d(0f64..categories.len() as f64, 0usize..y_max + y_max / 10 + 1)?;

    chart
        .configure_mesh()
        .x_desc(x_label)
        .y_desc(y_label)
        .x_labels(categories.len())
        .x_label_formatter(&move |x| {
            let idx = *x as usize;
            labels.get(idx).cloned().unwrap_or_default()
        })
        .draw()?;

    chart.draw_series(counts.iter().enumerate().map(|(i, &count)| {
        Rectangle::new(
            [(i as f64 + 0.15, 0), (i as f64 + 0.85, count)],
            BLUE.mix(0.6).filled(),
        )
    }))?;

    Ok(())
}

fn draw_scatter(
    root: &DrawingArea<SVGBackend, plotters::coord::Shift>,
    title: &str,
    x_label: &str,
    y_label: &str,
    points: &[(f64, f64)],
) -> DrawResult {
    let (x_max, y_max) = points.iter().fold((1.0f64, 1.0f64), |(xm, ym), &(x, y)| {
        (xm.max(x), ym.max(y))
    });

    let mut chart = ChartBuilder::on(root)
        .caption(title, ("sans-serif", 24))
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(0f64..x_max * 1.05, 0f64..y_max * 1.05)?;

    chart
        .configure_mesh()
        .x_desc(x_label)
        .y_desc(y_label)
        .draw()?;

    chart.draw_series(
        points
            .iter()
            .map(|&(x, y)| Circle::new((x, y), 3, BLUE.filled())),
    )?;

    Ok(())
}

/// Run-scoped ordered collection of figures.
///
/// Threaded through the pipeline by mutable reference so no stage holds
/// hidden shared state across runs.
#[derive(Debug, Default)]
pub struct FigureBook {
    figures: Vec<Figure>,
}

impl FigureBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, figure: Figure) {
        self.figures.push(figure);
    }

    pub fn len(&self) -> usize {
        self.figures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.figures.is_empty()
    }

    pub fn titles(&self) -> impl Iterator<Item = &str> {
        self.figures.iter().map(|f| f.title.as_str())
    }

    /// Write every accumulated figure, in insertion order, into a single
    /// multi-page HTML document.
    pub fn write_document<P: AsRef<Path>>(&self, path: P) -> Result<(), FigureError> {
        let mut file = std::fs::File::create(path.as_ref())?;
        writeln!(file, "<!DOCTYPE html>")?;
        writeln!(file, "<html><head><meta charset=\"utf-8\">")?;
        writeln!(file, "<title>QC report</title>")?;
        writeln!(
            file,
            "<style>section {{ page-break-after: always; margin: 2em auto; width: {FIGURE_WIDTH}px; }}</style>"
        )?;
        writeln!(file, "</head><body>")?;
        for figure in &self.figures {
            writeln!(file, "<section>")?;
            file.write_all(figure.svg().as_bytes())?;
            writeln!(file, "</section>")?;
        }
        writeln!(file, "</body></html>")?;
        tracing::info!(
            path = %path.as_ref().display(),
            figures = self.figures.len(),
            "wrote QC report document"
        );
        Ok(())
    }
}
