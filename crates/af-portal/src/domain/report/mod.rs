use std::collections::BTreeMap;

use anyhow::Result;
use base64::{engine::general_purpose::STANDARD as base64_engine, Engine};
use chrono::{Duration, NaiveDate};
use plotters::prelude::*;

const PLOT_SIZE: (u32, u32) = (900, 480);

/// Directory timestamps look like `2021-Apr-26 21:05:44.545 UTC`; ISO dates are accepted too.
pub fn parse_join_date(raw: &str) -> Option<NaiveDate> {
    let date = raw.split(|c: char| c.is_whitespace() || c == 'T').next()?;
    NaiveDate::parse_from_str(date, "%Y-%b-%d").or_else(|_| NaiveDate::parse_from_str(date, "%Y-%m-%d")).ok()
}

/// Reformats a join date for display, leaving unparseable values untouched.
pub fn format_join_date(raw: &str, format: &str) -> String {
    parse_join_date(raw).map(|date| date.format(format).to_string()).unwrap_or_else(|| raw.to_owned())
}

/// Cumulative user count at each distinct join date, oldest first.
pub fn users_over_time<S: AsRef<str>>(join_dates: &[S]) -> Vec<(NaiveDate, usize)> {
    let mut joined_per_day: BTreeMap<NaiveDate, usize> = BTreeMap::new();
    for date in join_dates.iter().filter_map(|raw| parse_join_date(raw.as_ref())) {
        *joined_per_day.entry(date).or_default() += 1;
    }

    joined_per_day
        .into_iter()
        .scan(0, |total, (date, joined)| {
            *total += joined;
            Some((date, *total))
        })
        .collect()
}

/// Line chart of `series` as a base64 encoded SVG document.
pub fn render_users_plot(series: &[(NaiveDate, usize)]) -> Result<String> {
    let start = series.first().map(|(date, _)| *date).unwrap_or_default();
    let span = series.last().map(|(date, _)| (*date - start).num_days()).unwrap_or(0).max(1);
    let max_users = series.iter().map(|(_, users)| *users).max().unwrap_or(0).max(1);

    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, PLOT_SIZE).into_drawing_area();
        root.fill(&WHITE)?;

        let mut chart = ChartBuilder::on(&root)
            .caption("Users over time", ("sans-serif", 24))
            .margin(16)
            .x_label_area_size(40)
            .y_label_area_size(56)
            .build_cartesian_2d(0i64..span, 0usize..max_users)?;

        let label_date = |offset: &i64| (start + Duration::days(*offset)).format("%Y-%m-%d").to_string();
        chart.configure_mesh().x_desc("Join date").y_desc("Users").x_label_formatter(&label_date).draw()?;

        chart.draw_series(LineSeries::new(
            series.iter().map(|(date, users)| ((*date - start).num_days(), *users)),
            &BLUE,
        ))?;

        root.present()?;
    }

    Ok(base64_engine.encode(svg))
}
