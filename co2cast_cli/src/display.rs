use comfy_table::{presets::NOTHING, *};
use itertools::izip;

use co2cast::forecast::Forecast;
use co2cast::sampler::ChainStats;
use co2cast::trace::ParameterSummary;
use co2cast::{DatasetSummary, COL};
use polars::frame::DataFrame;

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(NOTHING)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_style(comfy_table::TableComponent::BottomBorder, '─')
        .set_style(comfy_table::TableComponent::MiddleHeaderIntersections, '─')
        .set_style(comfy_table::TableComponent::HeaderLines, '─')
        .set_style(comfy_table::TableComponent::BottomBorderIntersections, '─')
        .set_style(comfy_table::TableComponent::TopBorder, '─')
        .set_style(comfy_table::TableComponent::TopBorderIntersections, '─');
    table
}

fn header(names: &[&str]) -> Vec<Cell> {
    names
        .iter()
        .map(|name| Cell::new(name).add_attribute(Attribute::Bold))
        .collect()
}

fn right_align(table: &mut Table, columns: std::ops::Range<usize>) {
    for index in columns {
        if let Some(column) = table.column_mut(index) {
            column.set_cell_alignment(CellAlignment::Right);
        }
    }
}

fn format_optional(value: Option<f64>, precision: usize) -> String {
    value
        .map(|v| format!("{v:.precision$}"))
        .unwrap_or_default()
}

pub fn display_dataset_summary(summary: &DatasetSummary) {
    let mut table = new_table();
    for (name, value) in [
        ("Cleaned panel", summary.cleaned_path.display().to_string()),
        ("Rows", summary.rows.to_string()),
        ("Columns", summary.columns.to_string()),
        ("Countries", summary.countries.to_string()),
        ("Sample", summary.sample_path.display().to_string()),
        ("Sample rows", summary.sample_rows.to_string()),
    ] {
        table.add_row(vec![Cell::new(name).add_attribute(Attribute::Bold), value.into()]);
    }
    right_align(&mut table, 0..1);
    println!("\n{}", table);
}

pub fn display_posterior_summary(summary: &[ParameterSummary]) {
    let mut table = new_table();
    table.set_header(header(&[
        "Parameter", "Mean", "SD", "HDI 3%", "HDI 97%", "R-hat", "ESS",
    ]));
    for parameter in summary {
        table.add_row(vec![
            parameter.name.clone(),
            format!("{:.4}", parameter.mean),
            format!("{:.4}", parameter.sd),
            format!("{:.4}", parameter.hdi_low),
            format!("{:.4}", parameter.hdi_high),
            format!("{:.3}", parameter.r_hat),
            format!("{:.0}", parameter.ess),
        ]);
    }
    right_align(&mut table, 1..7);
    println!("\n{}", table);
}

pub fn display_chain_stats(chains: &[ChainStats]) {
    let mut table = new_table();
    table.set_header(header(&[
        "Chain",
        "Acceptance",
        "Divergences",
        "Step size",
        "Leapfrog steps",
    ]));
    for chain in chains {
        table.add_row(vec![
            chain.chain.to_string(),
            format!("{:.3}", chain.mean_accept),
            chain.divergences.to_string(),
            format!("{:.4}", chain.step_size),
            format!("{:.1}", chain.mean_leapfrog_steps),
        ]);
    }
    right_align(&mut table, 0..5);
    println!("\n{}", table);
}

pub fn display_forecast(forecast: &Forecast) -> anyhow::Result<()> {
    let df = forecast.to_df()?;
    let mut table = new_table();
    table.set_header(header(&["Year", "Observed", "Forecast", "Lower", "Upper"]));
    for (year, observed, mean, lower, upper) in izip!(
        df.column(COL::YEAR)?.i64()?,
        df.column("observed")?.f64()?,
        df.column("forecast")?.f64()?,
        df.column("lower")?.f64()?,
        df.column("upper")?.f64()?,
    ) {
        table.add_row(vec![
            year.map(|y| y.to_string()).unwrap_or_default(),
            format_optional(observed, 2),
            format_optional(mean, 2),
            format_optional(lower, 2),
            format_optional(upper, 2),
        ]);
    }
    right_align(&mut table, 0..5);
    println!("\n{}\n", forecast.title());
    println!("{}", table);
    Ok(())
}

pub fn display_distribution_fits(fits: &DataFrame) -> anyhow::Result<()> {
    let mut table = new_table();
    table.set_header(header(&[
        "Column", "n", "df", "loc", "scale", "KS", "p-value",
    ]));
    for (column, n, df, loc, scale, statistic, p_value) in izip!(
        fits.column("column")?.str()?,
        fits.column("n")?.u64()?,
        fits.column("df")?.f64()?,
        fits.column("loc")?.f64()?,
        fits.column("scale")?.f64()?,
        fits.column("ks_statistic")?.f64()?,
        fits.column("p_value")?.f64()?,
    ) {
        table.add_row(vec![
            column.unwrap_or_default().to_string(),
            n.map(|n| n.to_string()).unwrap_or_default(),
            format_optional(df, 2),
            format_optional(loc, 3),
            format_optional(scale, 3),
            format_optional(statistic, 3),
            format_optional(p_value, 3),
        ]);
    }
    right_align(&mut table, 1..7);
    println!("\n{}", table);
    Ok(())
}
