//! Forecast and exploratory charts.
//!
//! Every `draw_*` function renders onto a drawing area supplied by the caller, so the same code
//! writes PNG files through [`save_png`] and renders into in-memory bitmaps in tests. Inputs with
//! nothing to show are skipped without drawing.

use std::fs::create_dir_all;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::Result;
use itertools::Itertools;
use log::{debug, info};
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use plotters::style::{register_font, FontStyle};
use polars::prelude::*;

use crate::error::Co2castError;
use crate::features::log_safe;
use crate::forecast::Forecast;
use crate::COL;

const FONT_FAMILY: &str = "sans-serif";
const HISTOGRAM_BINS: usize = 30;

const HISTORICAL_COLOR: RGBColor = RGBColor(31, 119, 180);
const FORECAST_COLOR: RGBColor = RGBColor(255, 127, 14);
const BAR_COLOR: RGBColor = RGBColor(31, 119, 180);
const COLD: RGBColor = RGBColor(59, 76, 192);
const NEUTRAL: RGBColor = RGBColor(221, 221, 221);
const WARM: RGBColor = RGBColor(180, 4, 38);

pub const FORECAST_SIZE: (u32, u32) = (1200, 600);
pub const CHART_SIZE: (u32, u32) = (1000, 600);
pub const HEATMAP_SIZE: (u32, u32) = (1200, 1000);

static FONTS: OnceLock<Result<(), String>> = OnceLock::new();

/// The bitmap backend has no system fonts, so the bundled face is registered once per process.
fn register_fonts() -> Result<(), Co2castError> {
    FONTS
        .get_or_init(|| {
            register_font(
                FONT_FAMILY,
                FontStyle::Normal,
                include_bytes!("../assets/DejaVuSans.ttf"),
            )
            .map_err(|_| "could not load the bundled font".to_string())
        })
        .clone()
        .map_err(Co2castError::PlotError)
}

/// Render `draw` into a PNG file at `path`, creating parent directories as needed.
pub fn save_png<P, F>(path: P, size: (u32, u32), draw: F) -> Result<PathBuf>
where
    P: AsRef<Path>,
    F: FnOnce(&DrawingArea<BitMapBackend<'_>, Shift>) -> Result<()>,
{
    register_fonts()?;
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }
    let root = BitMapBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE)?;
    draw(&root)?;
    root.present()?;
    info!("Saved figure to {}", path.display());
    Ok(path.to_path_buf())
}

/// Smallest and largest finite value, padded by 5% of the span
fn padded_bounds<I: IntoIterator<Item = f64>>(values: I) -> (f64, f64) {
    let (min, max) = values
        .into_iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
    if !min.is_finite() {
        return (0.0, 1.0);
    }
    let span = max - min;
    if span <= 0.0 {
        let pad = if min == 0.0 { 1.0 } else { min.abs() * 0.1 };
        return (min - pad, max + pad);
    }
    (min - 0.05 * span, max + 0.05 * span)
}

/// Label for a categorical axis whose categories sit on the integer positions
fn category_label(names: &[String], position: f64) -> String {
    let index = position.round();
    if (position - index).abs() > 1e-6 || index < 0.0 {
        return String::new();
    }
    names
        .get(index as usize)
        .map(|name| {
            if name.chars().count() > 18 {
                format!("{}…", name.chars().take(17).collect::<String>())
            } else {
                name.clone()
            }
        })
        .unwrap_or_default()
}

/// Historical series with markers, the dashed mean forecast and the prediction band.
pub fn draw_forecast<DB: DrawingBackend>(
    area: &DrawingArea<DB, Shift>,
    forecast: &Forecast,
) -> Result<()>
where
    DB::ErrorType: 'static,
{
    register_fonts()?;
    let historical = forecast.historical();
    let mean = forecast.mean();
    let band = forecast.band();
    let (Some(&x_min), Some(&x_max)) = (forecast.all_years.first(), forecast.all_years.last())
    else {
        return Ok(());
    };
    if historical.is_empty() && mean.is_empty() {
        return Ok(());
    }
    let (y_min, y_max) = padded_bounds(
        historical
            .iter()
            .chain(&mean)
            .map(|(_, v)| *v)
            .chain(band.iter().flat_map(|(_, low, high)| [*low, *high])),
    );

    let mut chart = ChartBuilder::on(area)
        .caption(forecast.title(), (FONT_FAMILY, 24))
        .margin(15)
        .x_label_area_size(40)
        .y_label_area_size(90)
        .build_cartesian_2d(x_min..x_max.max(x_min + 1), y_min..y_max)?;
    chart
        .configure_mesh()
        .x_desc("Year")
        .y_desc("Value")
        .draw()?;

    if !band.is_empty() {
        let outline = band
            .iter()
            .map(|(year, low, _)| (*year, *low))
            .chain(band.iter().rev().map(|(year, _, high)| (*year, *high)))
            .collect_vec();
        chart
            .draw_series(std::iter::once(Polygon::new(
                outline,
                FORECAST_COLOR.mix(0.2).filled(),
            )))?
            .label("Prediction Interval")
            .legend(|(x, y)| {
                Rectangle::new([(x, y - 5), (x + 20, y + 5)], FORECAST_COLOR.mix(0.2).filled())
            });
    }

    chart
        .draw_series(LineSeries::new(
            historical.clone(),
            HISTORICAL_COLOR.stroke_width(2),
        ))?
        .label("Historical")
        .legend(|(x, y)| {
            PathElement::new(vec![(x, y), (x + 20, y)], HISTORICAL_COLOR.stroke_width(2))
        });
    chart.draw_series(
        historical
            .iter()
            .map(|point| Circle::new(*point, 3, HISTORICAL_COLOR.filled())),
    )?;

    chart
        .draw_series(DashedLineSeries::new(
            mean,
            8,
            5,
            FORECAST_COLOR.stroke_width(2),
        ))?
        .label("Forecast")
        .legend(|(x, y)| {
            PathElement::new(vec![(x, y), (x + 20, y)], FORECAST_COLOR.stroke_width(2))
        });

    if let Some(last) = forecast.last_observed_year() {
        chart.draw_series(DashedLineSeries::new(
            vec![(last, y_min), (last, y_max)],
            6,
            4,
            BLACK.mix(0.4).stroke_width(1),
        ))?;
    }

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::UpperLeft)
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;
    Ok(())
}

/// Numeric columns of `df` in table order
pub fn numeric_columns(df: &DataFrame) -> Vec<String> {
    df.get_columns()
        .iter()
        .filter(|series| series.dtype().is_numeric())
        .map(|series| series.name().to_string())
        .collect()
}

fn float_values(df: &DataFrame, column: &str) -> Result<Vec<Option<f64>>> {
    let series = df
        .column(column)
        .map_err(|_| Co2castError::MissingColumn(column.into()))?
        .cast(&DataType::Float64)?;
    Ok(series.f64()?.into_iter().collect())
}

/// `(column, nulls)` for every column with at least one null
pub fn null_counts(df: &DataFrame) -> Vec<(String, usize)> {
    df.get_columns()
        .iter()
        .filter(|series| series.null_count() > 0)
        .map(|series| (series.name().to_string(), series.null_count()))
        .collect()
}

pub fn draw_null_counts<DB: DrawingBackend>(area: &DrawingArea<DB, Shift>, df: &DataFrame) -> Result<()>
where
    DB::ErrorType: 'static,
{
    register_fonts()?;
    let counts = null_counts(df);
    if counts.is_empty() {
        info!("No missing values in the dataset");
        return Ok(());
    }
    let names = counts.iter().map(|(name, _)| name.clone()).collect_vec();
    let max = counts.iter().map(|(_, count)| *count).max().unwrap_or(1) as f64;

    let mut chart = ChartBuilder::on(area)
        .caption("Null Value Count by Column", (FONT_FAMILY, 24))
        .margin(15)
        .x_label_area_size(40)
        .y_label_area_size(160)
        .build_cartesian_2d(0.0..max * 1.05, -0.5..names.len() as f64 - 0.5)?;
    let label = |y: &f64| category_label(&names, *y);
    chart
        .configure_mesh()
        .disable_y_mesh()
        .y_labels(names.len())
        .y_label_formatter(&label)
        .x_desc("Number of Null Values")
        .draw()?;
    chart.draw_series(counts.iter().enumerate().map(|(i, (_, count))| {
        let y = i as f64;
        Rectangle::new([(0.0, y - 0.4), (*count as f64, y + 0.4)], BAR_COLOR.filled())
    }))?;
    Ok(())
}

/// Pearson correlation over the rows where both values are present
pub fn pearson(a: &[Option<f64>], b: &[Option<f64>]) -> Option<f64> {
    let pairs = a
        .iter()
        .zip(b)
        .filter_map(|(x, y)| Some(((*x)?, (*y)?)))
        .filter(|(x, y)| x.is_finite() && y.is_finite())
        .collect_vec();
    if pairs.len() < 2 {
        return None;
    }
    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|(_, y)| y).sum::<f64>() / n;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (x, y) in &pairs {
        sxy += (x - mean_x) * (y - mean_y);
        sxx += (x - mean_x).powi(2);
        syy += (y - mean_y).powi(2);
    }
    if sxx == 0.0 || syy == 0.0 {
        return None;
    }
    Some(sxy / (sxx * syy).sqrt())
}

/// Pairwise-complete correlation matrix of the numeric columns
pub fn correlation_matrix(df: &DataFrame) -> Result<(Vec<String>, Vec<Vec<Option<f64>>>)> {
    let columns = numeric_columns(df);
    let values = columns
        .iter()
        .map(|column| float_values(df, column))
        .collect::<Result<Vec<_>>>()?;
    let matrix = values
        .iter()
        .map(|a| values.iter().map(|b| pearson(a, b)).collect())
        .collect();
    Ok((columns, matrix))
}

fn diverging_color(r: f64) -> RGBColor {
    let lerp = |from: u8, to: u8, t: f64| (from as f64 + (to as f64 - from as f64) * t).round() as u8;
    let t = r.clamp(-1.0, 1.0).abs();
    let end = if r < 0.0 { COLD } else { WARM };
    RGBColor(
        lerp(NEUTRAL.0, end.0, t),
        lerp(NEUTRAL.1, end.1, t),
        lerp(NEUTRAL.2, end.2, t),
    )
}

pub fn draw_correlation_heatmap<DB: DrawingBackend>(
    area: &DrawingArea<DB, Shift>,
    df: &DataFrame,
) -> Result<()>
where
    DB::ErrorType: 'static,
{
    register_fonts()?;
    let (columns, matrix) = correlation_matrix(df)?;
    if columns.is_empty() {
        return Ok(());
    }
    let k = columns.len();
    // First column on the top row
    let reversed = columns.iter().rev().cloned().collect_vec();

    let mut chart = ChartBuilder::on(area)
        .caption("Correlation Matrix Heatmap", (FONT_FAMILY, 24))
        .margin(15)
        .x_label_area_size(60)
        .y_label_area_size(160)
        .build_cartesian_2d(-0.5..k as f64 - 0.5, -0.5..k as f64 - 0.5)?;
    let x_label = |x: &f64| category_label(&columns, *x);
    let y_label = |y: &f64| category_label(&reversed, *y);
    chart
        .configure_mesh()
        .disable_mesh()
        .x_labels(k)
        .y_labels(k)
        .x_label_formatter(&x_label)
        .y_label_formatter(&y_label)
        .draw()?;

    let cells = matrix.iter().enumerate().flat_map(|(i, row)| {
        row.iter().enumerate().map(move |(j, r)| {
            let (x, y) = (j as f64, (k - 1 - i) as f64);
            let color = r.map(diverging_color).unwrap_or(WHITE);
            Rectangle::new([(x - 0.5, y - 0.5), (x + 0.5, y + 0.5)], color.filled())
        })
    });
    chart.draw_series(cells)?;

    let annotation = TextStyle::from((FONT_FAMILY, 12).into_font())
        .color(&BLACK)
        .pos(Pos::new(HPos::Center, VPos::Center));
    let labels = matrix.iter().enumerate().flat_map(|(i, row)| {
        let annotation = annotation.clone();
        row.iter().enumerate().filter_map(move |(j, r)| {
            r.map(|r| {
                Text::new(
                    format!("{r:.2}"),
                    (j as f64, (k - 1 - i) as f64),
                    annotation.clone(),
                )
            })
        })
    });
    chart.draw_series(labels)?;
    Ok(())
}

/// Equal-width bins over the range of `values` as `(low, high, count)`
pub fn histogram(values: &[f64], bins: usize) -> Vec<(f64, f64, usize)> {
    let finite = values.iter().copied().filter(|v| v.is_finite()).collect_vec();
    if finite.is_empty() || bins == 0 {
        return vec![];
    }
    let (mut min, mut max) = finite
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(*v), hi.max(*v))
        });
    if min == max {
        min -= 0.5;
        max += 0.5;
    }
    let width = (max - min) / bins as f64;
    let mut counts = vec![0usize; bins];
    for value in finite {
        let bin = (((value - min) / width) as usize).min(bins - 1);
        counts[bin] += 1;
    }
    counts
        .into_iter()
        .enumerate()
        .map(|(i, count)| (min + i as f64 * width, min + (i + 1) as f64 * width, count))
        .collect()
}

fn draw_histogram<DB: DrawingBackend>(
    area: &DrawingArea<DB, Shift>,
    title: &str,
    values: &[f64],
) -> Result<()>
where
    DB::ErrorType: 'static,
{
    let bins = histogram(values, HISTOGRAM_BINS);
    let (Some(first), Some(last)) = (bins.first(), bins.last()) else {
        debug!("no values to draw for {title}");
        return Ok(());
    };
    let max = bins.iter().map(|(_, _, count)| *count).max().unwrap_or(1) as f64;

    let mut chart = ChartBuilder::on(area)
        .caption(title, (FONT_FAMILY, 14))
        .margin(8)
        .x_label_area_size(25)
        .y_label_area_size(45)
        .build_cartesian_2d(first.0..last.1, 0.0..max * 1.1)?;
    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(5)
        .y_labels(5)
        .y_desc("Frequency")
        .draw()?;
    chart.draw_series(bins.iter().map(|(low, high, count)| {
        Rectangle::new([(*low, 0.0), (*high, *count as f64)], BAR_COLOR.mix(0.7).filled())
    }))?;
    Ok(())
}

fn draw_grid<DB, F>(area: &DrawingArea<DB, Shift>, df: &DataFrame, n_cols: usize, panel: F) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
    F: Fn(&str, Vec<Option<f64>>) -> (String, Vec<f64>),
{
    register_fonts()?;
    let columns = numeric_columns(df);
    if columns.is_empty() || n_cols == 0 {
        return Ok(());
    }
    let n_rows = columns.len().div_ceil(n_cols);
    let panels = area.split_evenly((n_rows, n_cols));
    for (cell, column) in panels.iter().zip(&columns) {
        let (title, values) = panel(column, float_values(df, column)?);
        draw_histogram(cell, &title, &values)?;
    }
    Ok(())
}

/// One 30-bin histogram per numeric column, `n_cols` panels per row.
pub fn draw_distributions_grid<DB: DrawingBackend>(
    area: &DrawingArea<DB, Shift>,
    df: &DataFrame,
    n_cols: usize,
) -> Result<()>
where
    DB::ErrorType: 'static,
{
    draw_grid(area, df, n_cols, |column, values| {
        (column.to_string(), values.into_iter().flatten().collect())
    })
}

/// As [`draw_distributions_grid`] on the natural log; non-positive values are left out.
pub fn draw_log_distributions_grid<DB: DrawingBackend>(
    area: &DrawingArea<DB, Shift>,
    df: &DataFrame,
    n_cols: usize,
) -> Result<()>
where
    DB::ErrorType: 'static,
{
    draw_grid(area, df, n_cols, |column, values| {
        (
            format!("Log({column})"),
            log_safe(&values).into_iter().flatten().collect(),
        )
    })
}

/// Sum of `column` per year, ordered by year
pub fn global_trend(df: &DataFrame, column: &str) -> Result<Vec<(i64, f64)>> {
    let totals = df
        .clone()
        .lazy()
        .group_by([col(COL::YEAR)])
        .agg([col(column).cast(DataType::Float64).sum()])
        .sort([COL::YEAR], SortMultipleOptions::default())
        .collect()?;
    let years = totals.column(COL::YEAR)?.cast(&DataType::Int64)?;
    let sums = totals.column(column)?.cast(&DataType::Float64)?;
    Ok(years
        .i64()?
        .into_iter()
        .zip(sums.f64()?)
        .filter_map(|(year, sum)| Some((year?, sum?)))
        .collect())
}

/// The `n` countries with the largest total of `column`, largest first
pub fn top_emitters(df: &DataFrame, n: usize, column: &str) -> Result<Vec<(String, f64)>> {
    let totals = df
        .clone()
        .lazy()
        .group_by([col(COL::COUNTRY)])
        .agg([col(column).cast(DataType::Float64).sum()])
        .sort(
            [column],
            SortMultipleOptions::default()
                .with_order_descending(true)
                .with_nulls_last(true),
        )
        .limit(n as IdxSize)
        .collect()?;
    let countries = totals.column(COL::COUNTRY)?.cast(&DataType::String)?;
    let sums = totals.column(column)?.cast(&DataType::Float64)?;
    Ok(countries
        .str()?
        .into_iter()
        .zip(sums.f64()?)
        .filter_map(|(country, sum)| Some((country?.to_string(), sum?)))
        .collect())
}

pub fn draw_global_trend<DB: DrawingBackend>(
    area: &DrawingArea<DB, Shift>,
    df: &DataFrame,
    column: &str,
) -> Result<()>
where
    DB::ErrorType: 'static,
{
    register_fonts()?;
    let trend = global_trend(df, column)?;
    let (Some(first), Some(last)) = (trend.first(), trend.last()) else {
        return Ok(());
    };
    let (y_min, y_max) = padded_bounds(trend.iter().map(|(_, v)| *v));

    let mut chart = ChartBuilder::on(area)
        .caption(format!("Global {column} Over Time"), (FONT_FAMILY, 24))
        .margin(15)
        .x_label_area_size(40)
        .y_label_area_size(90)
        .build_cartesian_2d(first.0..last.0.max(first.0 + 1), y_min..y_max)?;
    chart
        .configure_mesh()
        .x_desc("Year")
        .y_desc(column)
        .draw()?;
    chart.draw_series(LineSeries::new(trend.clone(), HISTORICAL_COLOR.stroke_width(2)))?;
    chart.draw_series(
        trend
            .iter()
            .map(|point| Circle::new(*point, 3, HISTORICAL_COLOR.filled())),
    )?;
    Ok(())
}

pub fn draw_top_emitters<DB: DrawingBackend>(
    area: &DrawingArea<DB, Shift>,
    df: &DataFrame,
    n: usize,
    column: &str,
) -> Result<()>
where
    DB::ErrorType: 'static,
{
    register_fonts()?;
    let top = top_emitters(df, n, column)?;
    if top.is_empty() {
        return Ok(());
    }
    let names = top.iter().map(|(name, _)| name.clone()).collect_vec();
    let (_, y_max) = padded_bounds(top.iter().map(|(_, v)| *v).chain([0.0]));

    let mut chart = ChartBuilder::on(area)
        .caption(format!("Top {n} CO₂ Emitting Countries"), (FONT_FAMILY, 24))
        .margin(15)
        .x_label_area_size(40)
        .y_label_area_size(90)
        .build_cartesian_2d(-0.5..names.len() as f64 - 0.5, 0.0..y_max)?;
    let label = |x: &f64| category_label(&names, *x);
    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(names.len())
        .x_label_formatter(&label)
        .x_desc("Country")
        .y_desc(column)
        .draw()?;
    chart.draw_series(top.iter().enumerate().map(|(i, (_, total))| {
        let x = i as f64;
        Rectangle::new([(x - 0.4, 0.0), (x + 0.4, *total)], BAR_COLOR.filled())
    }))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modeling::ModelKind;

    const SIZE: (u32, u32) = (640, 480);

    /// Render `draw` into an in-memory bitmap and return the pixels.
    fn render<F>(draw: F) -> Result<Vec<u8>>
    where
        F: FnOnce(&DrawingArea<BitMapBackend<'_>, Shift>) -> Result<()>,
    {
        let mut buffer = vec![0u8; (SIZE.0 * SIZE.1 * 3) as usize];
        {
            let root = BitMapBackend::with_buffer(&mut buffer, SIZE).into_drawing_area();
            root.fill(&WHITE)?;
            draw(&root)?;
            root.present()?;
        }
        Ok(buffer)
    }

    fn is_blank(pixels: &[u8]) -> bool {
        pixels.iter().all(|p| *p == 255)
    }

    fn panel() -> DataFrame {
        df!(
            "country" => ["A", "A", "B", "B", "C", "C"],
            "year" => [2000i64, 2001, 2000, 2001, 2000, 2001],
            "Annual_CO₂_emissions" => [1.0, 2.0, 10.0, 20.0, 5.0, 6.0],
            "GDP" => [Some(10.0), Some(20.0), None, Some(200.0), Some(50.0), Some(70.0)],
        )
        .unwrap()
    }

    fn forecast() -> Forecast {
        let years = (2010i64..=2015).collect_vec();
        let all_years = (2010i64..=2020).collect_vec();
        Forecast {
            kind: ModelKind::PopTrend,
            country: "X".into(),
            hist_log: years.iter().map(|y| Some(0.01 * (y - 2010) as f64)).collect(),
            mean_pred: all_years
                .iter()
                .map(|y| Some(0.01 * (y - 2010) as f64))
                .collect(),
            years,
            all_years,
            pi_sigma: 0.05,
        }
    }

    #[test]
    fn forecast_renders_into_bitmap() -> Result<()> {
        let pixels = render(|area| draw_forecast(area, &forecast()))?;
        assert!(!is_blank(&pixels));
        Ok(())
    }

    #[test]
    fn empty_inputs_are_skipped() -> Result<()> {
        let mut empty = forecast();
        empty.years.clear();
        empty.hist_log.clear();
        empty.all_years.clear();
        empty.mean_pred.clear();
        assert!(is_blank(&render(|area| draw_forecast(area, &empty))?));

        let complete = df!("year" => [2000i64], "GDP" => [1.0]).unwrap();
        assert!(is_blank(&render(|area| draw_null_counts(area, &complete))?));

        let text = df!("country" => ["A"]).unwrap();
        assert!(is_blank(&render(|area| draw_distributions_grid(area, &text, 3))?));
        assert!(is_blank(&render(|area| draw_correlation_heatmap(area, &text))?));
        Ok(())
    }

    #[test]
    fn exploratory_charts_render() -> Result<()> {
        let df = panel();
        assert!(!is_blank(&render(|area| draw_null_counts(area, &df))?));
        assert!(!is_blank(&render(|area| draw_correlation_heatmap(area, &df))?));
        assert!(!is_blank(&render(|area| draw_distributions_grid(area, &df, 2))?));
        assert!(!is_blank(&render(|area| draw_log_distributions_grid(area, &df, 2))?));
        assert!(!is_blank(&render(|area| {
            draw_global_trend(area, &df, COL::ANNUAL_CO2_EMISSIONS)
        })?));
        assert!(!is_blank(&render(|area| {
            draw_top_emitters(area, &df, 2, COL::ANNUAL_CO2_EMISSIONS)
        })?));
        Ok(())
    }

    #[test]
    fn aggregates_per_year_and_country() -> Result<()> {
        let df = panel();
        assert_eq!(
            global_trend(&df, COL::ANNUAL_CO2_EMISSIONS)?,
            vec![(2000, 16.0), (2001, 28.0)]
        );
        assert_eq!(
            top_emitters(&df, 2, COL::ANNUAL_CO2_EMISSIONS)?,
            vec![("B".to_string(), 30.0), ("C".to_string(), 11.0)]
        );
        assert_eq!(null_counts(&df), vec![("GDP".to_string(), 1)]);
        Ok(())
    }

    #[test]
    fn correlation_uses_complete_pairs() -> Result<()> {
        let a = [Some(1.0), Some(2.0), Some(3.0), None];
        let b = [Some(2.0), Some(4.0), Some(6.0), Some(100.0)];
        assert!((pearson(&a, &b).unwrap() - 1.0).abs() < 1e-12);
        let c = [Some(3.0), Some(2.0), Some(1.0), Some(0.0)];
        assert!((pearson(&a, &c).unwrap() + 1.0).abs() < 1e-12);
        assert_eq!(pearson(&a, &[Some(1.0); 4]), None);

        let (columns, matrix) = correlation_matrix(&panel())?;
        assert_eq!(columns, ["year", "Annual_CO₂_emissions", "GDP"]);
        assert_eq!(matrix[0][0], Some(1.0));
        Ok(())
    }

    #[test]
    fn histogram_counts_every_value() {
        let values = (0..100).map(f64::from).collect_vec();
        let bins = histogram(&values, 30);
        assert_eq!(bins.len(), 30);
        assert_eq!(bins.iter().map(|(_, _, count)| count).sum::<usize>(), 100);
        assert!((bins.last().unwrap().1 - 99.0).abs() < 1e-9);

        let constant = histogram(&[2.0, 2.0], 30);
        assert_eq!(constant.iter().map(|(_, _, count)| count).sum::<usize>(), 2);
        assert!(histogram(&[], 30).is_empty());
    }

    #[test]
    fn saves_png_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = save_png(dir.path().join("nested/forecast.png"), SIZE, |area| {
            draw_forecast(area, &forecast())
        })?;
        assert!(path.is_file());
        Ok(())
    }
}
