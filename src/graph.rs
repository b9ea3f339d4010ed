#![cfg(not(tarpaulin_include))]
#![cfg(feature = "web")]
use crate::report::SkillAgreement;
use plotters::prelude::*;
use std::io::Cursor;

/// Configuration options for the agreement chart
#[derive(Clone, Debug)]
pub struct GraphOptions {
    /// Title displayed at the top of the graph
    pub title: String,

    /// Label for the Y-axis
    pub y_label: String,

    /// Width of the graph in pixels
    pub width: u32,

    /// Height of the graph in pixels
    pub height: u32,

    /// Skill names longer than this are shortened on the X-axis
    pub max_label_chars: usize,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            title: "Agreement by Task".to_string(),
            y_label: "Responses".to_string(),
            width: 1000,
            height: 600,
            max_label_chars: 18,
        }
    }
}

/// Shorten a skill name for an axis label
pub fn axis_label(skill: &str, max_chars: usize) -> String {
    if skill.chars().count() <= max_chars {
        return skill.to_string();
    }
    let mut short: String = skill.chars().take(max_chars.saturating_sub(1)).collect();
    short.push('…');
    short
}

/// Highest stacked bar, used to size the Y-axis
pub fn max_stack(data: &[SkillAgreement]) -> u32 {
    data.iter()
        .map(|d| (d.yes + d.no) as u32)
        .max()
        .unwrap_or(0)
}

/// Creates a stacked bar chart of Yes/No counts per skill
///
/// Agreed responses form the lower (green) part of each bar, disagreements
/// are stacked on top in red.
///
/// # Returns
/// * PNG image data
pub fn create_agreement_chart(
    data: &[SkillAgreement],
    options: &GraphOptions,
) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let (width, height) = (options.width, options.height);
    let mut pixels = vec![0u8; (width * height * 3) as usize];
    let labels: Vec<String> = data
        .iter()
        .map(|d| axis_label(&d.skill, options.max_label_chars))
        .collect();

    {
        let root = BitMapBackend::with_buffer(&mut pixels, (width, height)).into_drawing_area();
        root.fill(&WHITE)?;

        let bars = data.len().max(1) as i32;
        let y_max = max_stack(data) + 1;

        let mut chart = ChartBuilder::on(&root)
            .caption(&options.title, ("sans-serif", 30).into_font())
            .margin(10)
            .x_label_area_size(60)
            .y_label_area_size(50)
            .build_cartesian_2d((0..bars).into_segmented(), 0u32..y_max)?;

        chart
            .configure_mesh()
            .disable_x_mesh()
            .y_desc(&options.y_label)
            .x_labels(labels.len().max(1))
            .x_label_formatter(&|value| match value {
                SegmentValue::CenterOf(i) => labels.get(*i as usize).cloned().unwrap_or_default(),
                _ => String::new(),
            })
            .draw()?;

        chart
            .draw_series(data.iter().enumerate().map(|(i, d)| {
                let i = i as i32;
                let mut bar = Rectangle::new(
                    [
                        (SegmentValue::Exact(i), 0),
                        (SegmentValue::Exact(i + 1), d.yes as u32),
                    ],
                    GREEN.filled(),
                );
                bar.set_margin(0, 0, 8, 8);
                bar
            }))?
            .label("Yes")
            .legend(|(x, y)| Rectangle::new([(x, y - 5), (x + 10, y + 5)], GREEN.filled()));

        chart
            .draw_series(data.iter().enumerate().map(|(i, d)| {
                let i = i as i32;
                let mut bar = Rectangle::new(
                    [
                        (SegmentValue::Exact(i), d.yes as u32),
                        (SegmentValue::Exact(i + 1), (d.yes + d.no) as u32),
                    ],
                    RED.filled(),
                );
                bar.set_margin(0, 0, 8, 8);
                bar
            }))?
            .label("No")
            .legend(|(x, y)| Rectangle::new([(x, y - 5), (x + 10, y + 5)], RED.filled()));

        chart
            .configure_series_labels()
            .background_style(&WHITE.mix(0.8))
            .border_style(&BLACK)
            .draw()?;

        root.present()?;
    }

    let image = image::RgbImage::from_raw(width, height, pixels)
        .ok_or("chart buffer has unexpected size")?;
    let mut png = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(image).write_to(&mut png, image::ImageOutputFormat::Png)?;
    Ok(png.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shortens_long_labels() {
        assert_eq!(axis_label("Audit", 18), "Audit");
        let short = axis_label("Management accounting and reporting", 10);
        assert_eq!(short.chars().count(), 10);
        assert!(short.ends_with('…'));
    }

    #[test]
    fn stack_height_covers_yes_and_no() {
        let data = vec![
            SkillAgreement {
                skill: "A".to_string(),
                yes: 2,
                no: 3,
            },
            SkillAgreement {
                skill: "B".to_string(),
                yes: 4,
                no: 0,
            },
        ];
        assert_eq!(max_stack(&data), 5);
        assert_eq!(max_stack(&[]), 0);
    }
}
