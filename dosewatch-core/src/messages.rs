//! User-facing message text.

use chrono::NaiveDate;

use crate::report::{DailySummary, DailyTier, WeeklyBand, WeeklySummary};

pub const TAKEN_BUTTON: &str = "✅ Taken";

const ENCOURAGEMENTS: &[&str] = &[
    "Great job taking your medicine, you're doing brilliantly!",
    "Well done! Looking after yourself is what matters most 💖",
    "You're awesome. Keep it up 👏",
    "Dose taken, one more step towards feeling well 🌿",
    "So proud of you! 🐱",
];

pub fn greeting() -> String {
    "Hi! I'll remind you to take your medication on schedule ❤️".to_string()
}

pub fn not_authorized() -> String {
    "Sorry, you're not on the list for this reminder.".to_string()
}

pub fn not_yours() -> String {
    "This isn't your dose 😉".to_string()
}

pub fn unknown_dose(label: &str) -> String {
    format!("I don't know a dose called '{label}'.")
}

pub fn try_again() -> String {
    "Something went wrong saving that. Please try again in a moment.".to_string()
}

pub fn no_subscriber() -> String {
    "No one is registered yet. Send /start to begin.".to_string()
}

pub fn prompt(label: &str) -> String {
    format!("Time for your {label} dose 💊\nPlease take your medicine and tap the button below.")
}

/// Rotates through the encouragement phrases so repeated taps on the same
/// day don't read identically, while staying deterministic.
pub fn confirmation(date: NaiveDate, slot_index: usize) -> String {
    use chrono::Datelike;
    let idx = (date.ordinal() as usize + slot_index) % ENCOURAGEMENTS.len();
    ENCOURAGEMENTS[idx].to_string()
}

pub fn observer_taken(label: &str, date: NaiveDate) -> String {
    format!("ℹ️ The {label} dose for {date} was taken.")
}

pub fn escalation(label: &str, date: NaiveDate) -> String {
    format!("⚠️ The {label} dose for {date} still hasn't been confirmed. You may want to check in.")
}

pub fn daily_report(summary: &DailySummary) -> String {
    let headline = match summary.tier {
        DailyTier::Full => "All doses taken today. Wonderful! 🌟",
        DailyTier::None => "No doses were confirmed today.",
        DailyTier::Partial => "Some doses were missed today.",
    };

    let mut out = format!(
        "📋 {} ({}/{})\n{}",
        summary.date, summary.taken_count, summary.total, headline
    );
    for slot in &summary.slots {
        let mark = if slot.taken { "✅" } else { "❌" };
        out.push_str(&format!("\n{mark} {}", slot.label));
    }
    out
}

pub fn weekly_report(summary: &WeeklySummary) -> String {
    let headline = match summary.band {
        WeeklyBand::Perfect => "A perfect week! Every dose taken 🏆",
        WeeklyBand::Strong => "A strong week, nearly every dose taken 💪",
        WeeklyBand::Fair => "About half or more of the doses were taken. Let's aim higher next week.",
        WeeklyBand::Low => "Most doses were missed this week. Time to talk about what's getting in the way?",
    };

    format!(
        "📊 Week {} to {}: {}/{} doses ({}%)\n{}",
        summary.start,
        summary.end,
        summary.taken,
        summary.possible,
        summary.percent(),
        headline
    )
}
