use tidepool::config::MatchSettings;
use tidepool::detector;

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: match_test <template.png> <screenshot.png> [screenshot2.png ...]");
        std::process::exit(1);
    }

    let settings = MatchSettings::default();

    let template_path = &args[1];
    let template_img = image::open(template_path).unwrap_or_else(|e| {
        eprintln!("Failed to load template image {template_path}: {e}");
        std::process::exit(1);
    });
    println!(
        "Template: {} ({}x{})",
        template_path,
        template_img.width(),
        template_img.height()
    );

    let Some(template) = detector::prepare_template(&template_img, settings.scale_down) else {
        eprintln!("Template too small to match");
        std::process::exit(1);
    };
    println!("Threshold: {:.2}", settings.confidence);
    println!();

    for screenshot_path in &args[2..] {
        let screenshot = match image::open(screenshot_path) {
            Ok(img) => img,
            Err(e) => {
                eprintln!("Failed to load {screenshot_path}: {e}");
                continue;
            }
        };

        let frame = detector::prepare_frame(&screenshot, settings.scale_down);
        match detector::best_match(&frame, &template, settings.scale_down) {
            Some(m) => {
                let status = if m.score >= settings.confidence {
                    "MATCH"
                } else {
                    "no match"
                };
                println!(
                    "{screenshot_path}: {status} score={:.4} center=({}, {}) click=({}, {})",
                    m.score,
                    m.x,
                    m.y,
                    m.x,
                    m.y as i32 + settings.click_offset_y
                );
            }
            None => {
                println!("{screenshot_path}: template larger than screenshot");
            }
        }
    }
}
