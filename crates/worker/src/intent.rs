//! Plain-language requests mapped to commands.
//!
//! DMs and mentions that are not `!` commands pass through here before the
//! conversation handler, so "catch me up <link>" runs `catchup` and "when is
//! the next birthday?" runs `birthday upcoming`. A message is only
//! considered when it is aimed at the bot, reads as a question, or is a
//! short request; the best matching phrase must then score at least
//! [`MIN_CONFIDENCE`].

use regex_lite::Regex;
use std::sync::LazyLock;

pub const MIN_CONFIDENCE: f32 = 0.7;

/// Added when the message names or mentions the bot.
const DIRECTED_BOOST: f32 = 0.1;
/// Added when the message is a question.
const QUESTION_BOOST: f32 = 0.05;

const BOT_NAMES: &[&str] = &["seedkeeper", "seed keeper", "bot", "you"];
const QUESTION_WORDS: &[&str] = &[
    "what", "how", "when", "where", "who", "why", "can", "could", "would", "should", "is", "are",
    "do", "does", "will",
];
const SHORT_REQUEST_WORDS: usize = 5;
const SHORT_REQUEST_TRIGGERS: &[&str] = &[
    "help", "commands", "hello", "hi", "hey", "catch", "catchup", "birthday", "birthdays",
    "status", "health", "summarize", "fill me in", "give me", "tend", "garden", "how's",
];
const FOCUS_WORDS: &[&str] = &["technical", "social", "summary", "detailed", "quick"];

/// A command recognised in free text.
#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub command: &'static str,
    pub args: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy)]
enum Args {
    None,
    Fixed(&'static str),
    /// Message link and focus word
    Catchup,
    /// `mine MM-DD` when a date is present
    BirthdayDate,
}

struct Rule {
    command: &'static str,
    pattern: Regex,
    confidence: f32,
    args: Args,
}

fn rule(command: &'static str, pattern: &str, confidence: f32, args: Args) -> Rule {
    Rule {
        command,
        pattern: Regex::new(pattern).expect("intent pattern compiles"),
        confidence,
        args,
    }
}

static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    use Args::{BirthdayDate, Catchup, Fixed, None};
    vec![
        rule("commands", r"\b(what can you do|what do you do|help me|help|commands?|your commands?)\b", 0.9, None),
        rule("commands", r"\b(show me commands?|list commands?|available commands?)\b", 0.95, None),
        rule("commands", r"\b(what are your|tell me your|show your) (commands?|abilities|features)\b", 0.9, None),
        rule("commands", r"\bhow (do i use|to use) (you|this bot|seedkeeper)\b", 0.85, None),
        // A bare greeting only; "hi, how do seeds work" is conversation.
        rule("hello", r"^(hi|hello|hey|greetings?|howdy|yo)[\s.!?]*$", 0.9, None),
        rule("hello", r"\b(introduce yourself|who are you|tell me about yourself)\b", 0.9, None),
        rule("hello", r"\bwhat('s| is) (your name|seedkeeper)\b", 0.85, None),
        rule("catchup", r"\b(catch me up|catchup|catch up|what did i miss|what happened)\b", 0.9, Catchup),
        rule("catchup", r"\b(summarize|summary of|recap)( the)?( conversation| chat| messages?)?", 0.9, Catchup),
        rule("catchup", r"\b(fill me in|bring me up to speed|update me)( on what happened)?", 0.85, Catchup),
        rule("catchup", r"\bwhat('s| has) been (happening|going on|discussed)\b", 0.8, Catchup),
        rule("birthday", r"\bmy birthday (is|is on)", 0.9, BirthdayDate),
        rule("birthday", r"\bi was born (on|in)", 0.9, BirthdayDate),
        rule("birthday", r"\b(set|add|record|save)( my)? birthday", 0.9, BirthdayDate),
        rule("birthday", r"\b(when is|whose|who has a) birthday", 0.85, Fixed("upcoming")),
        rule("birthday", r"\b(upcoming|next) birthdays?\b", 0.9, Fixed("upcoming")),
        rule("birthday", r"\blist birthdays?\b", 0.9, Fixed("list")),
        rule("birthday", r"\bbirthdays? (upcoming|today|this week)\b", 0.95, Fixed("upcoming")),
        rule("birthday", r"\bbirthdays? list\b", 0.95, Fixed("list")),
        rule("birthday", r"\b(tell me about|show me|what) (the )?birthdays?\b", 0.9, Fixed("list")),
        rule("birthday", r"\bbirthdays? (you know|stored|saved)\b", 0.9, Fixed("list")),
        rule("seeds", r"\b(plant|give me|share|need)( a| some)? seeds?\b", 0.85, None),
        rule("seeds", r"\b(conversation starter|ice breaker|something to talk about)\b", 0.9, None),
        rule("seeds", r"\bthings? (are|is) quiet\b", 0.8, None),
        rule("tend", r"\btend( the)?( garden| community)?", 0.9, None),
        rule("tend", r"\b(care for|nurture)( the)?( garden| community)", 0.9, None),
        rule("tend", r"\b(community|garden) (care|wisdom|advice)\b", 0.85, None),
        rule("tend", r"\bhow (can i|to) help the community\b", 0.85, None),
        rule("seasons", r"\b(current|this) season\b", 0.8, None),
        rule("seasons", r"\b(community|garden) (phase|season|cycle)\b", 0.85, None),
        rule("seasons", r"\bwhat season (are we in|is it)\b", 0.9, None),
        rule("garden", r"\bhow('s| is) the garden", 0.9, None),
        rule("garden", r"\bgarden (status|state)", 0.9, None),
        rule("garden", r"\b(check on|look at|view) the garden\b", 0.85, None),
        rule("garden", r"\bgarden perspective\b", 0.95, None),
        rule("health", r"\b(status|health|how are you doing)\b", 0.8, None),
        rule("health", r"\b(are you|you) (ok|okay|working|alive|online)\b", 0.85, None),
        rule("health", r"\b(system|bot) (status|health|check)\b", 0.9, None),
    ]
});

static MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<@!?\d+>").expect("mention pattern compiles"));
static MESSAGE_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https://discord(?:app)?\.com/channels/\d+/\d+/\d+").expect("link pattern compiles")
});
static NUMERIC_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,2})[-/](\d{1,2})\b").expect("date pattern compiles"));
static NAMED_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(january|february|march|april|may|june|july|august|september|october|november|december)\s+(\d{1,2})\b",
    )
    .expect("date pattern compiles")
});

const MONTHS: [&str; 12] = [
    "january", "february", "march", "april", "may", "june", "july", "august", "september",
    "october", "november", "december",
];

/// The command `text` asks for, if any. `mentioned` is true when the
/// platform reported a mention of the bot.
pub fn detect(text: &str, mentioned: bool) -> Option<Intent> {
    let normalized = MENTION.replace_all(text, " ").trim().to_lowercase();
    if normalized.is_empty() || normalized.starts_with('!') {
        return None;
    }

    let directed = mentioned || BOT_NAMES.iter().any(|name| normalized.contains(name));
    let question = is_question(&normalized);
    if !directed && !question && !is_short_request(&normalized) {
        return None;
    }

    let mut best: Option<(&Rule, f32)> = None;
    for rule in RULES.iter() {
        if !rule.pattern.is_match(&normalized) {
            continue;
        }
        let mut confidence = rule.confidence;
        if directed {
            confidence = (confidence + DIRECTED_BOOST).min(1.0);
        }
        if question {
            confidence = (confidence + QUESTION_BOOST).min(1.0);
        }
        if best.is_none_or(|(_, top)| confidence > top) {
            best = Some((rule, confidence));
        }
    }

    let (rule, confidence) = best.filter(|(_, c)| *c >= MIN_CONFIDENCE)?;
    Some(Intent {
        command: rule.command,
        args: extract_args(rule.args, &normalized),
        confidence,
    })
}

fn is_question(text: &str) -> bool {
    text.contains('?')
        || text
            .split_whitespace()
            .next()
            .is_some_and(|first| QUESTION_WORDS.contains(&first))
}

fn is_short_request(text: &str) -> bool {
    text.split_whitespace().count() <= SHORT_REQUEST_WORDS
        && SHORT_REQUEST_TRIGGERS.iter().any(|t| text.contains(t))
}

fn extract_args(args: Args, text: &str) -> String {
    match args {
        Args::None => String::new(),
        Args::Fixed(sub) => sub.to_string(),
        Args::Catchup => {
            let link = MESSAGE_LINK.find(text).map(|m| m.as_str());
            let focus = FOCUS_WORDS.iter().find(|w| text.contains(*w)).copied();
            link.into_iter().chain(focus).collect::<Vec<_>>().join(" ")
        }
        Args::BirthdayDate => birthday_date(text)
            .map(|(month, day)| format!("mine {month:02}-{day:02}"))
            .unwrap_or_default(),
    }
}

fn birthday_date(text: &str) -> Option<(u32, u32)> {
    if let Some(c) = NUMERIC_DATE.captures(text) {
        return c[1].parse().ok().zip(c[2].parse().ok());
    }
    let c = NAMED_DATE.captures(text)?;
    let month = MONTHS.iter().position(|m| *m == &c[1])? as u32 + 1;
    Some((month, c[2].parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(text: &str) -> Option<&'static str> {
        detect(text, false).map(|i| i.command)
    }

    #[test]
    fn everyday_phrases_find_their_command() {
        assert_eq!(command("catch me up"), Some("catchup"));
        assert_eq!(command("what can you do?"), Some("commands"));
        assert_eq!(command("hello!"), Some("hello"));
        assert_eq!(command("who are you?"), Some("hello"));
        assert_eq!(command("how's the garden?"), Some("garden"));
        assert_eq!(command("what season are we in?"), Some("seasons"));
        assert_eq!(command("are you online?"), Some("health"));
        assert_eq!(command("give me a seed"), Some("seeds"));
    }

    #[test]
    fn ordinary_conversation_is_left_alone() {
        assert_eq!(command("the roses bloomed today"), None);
        assert_eq!(command("hi, the tomatoes finally ripened and I wanted to share"), None);
        assert_eq!(command("remember the roses"), None);
        assert_eq!(command(""), None);
        assert_eq!(command("!catchup"), None);
    }

    #[test]
    fn a_mention_counts_as_addressing_the_bot() {
        // Too long for a short request and not a question, so only the
        // mention lets it through.
        let text = "<@123> please recap the conversation for everyone who just arrived";
        assert_eq!(detect(text, false), None);
        let intent = detect(text, true).unwrap();
        assert_eq!(intent.command, "catchup");
        assert!((intent.confidence - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn catchup_keeps_the_link_and_focus() {
        let intent = detect(
            "can you catch me up from https://discord.com/channels/1/2/3 quick?",
            false,
        )
        .unwrap();
        assert_eq!(intent.command, "catchup");
        assert_eq!(intent.args, "https://discord.com/channels/1/2/3 quick");
    }

    #[test]
    fn birthdays_map_onto_subcommands() {
        let set = detect("my birthday is june 5", false).unwrap();
        assert_eq!((set.command, set.args.as_str()), ("birthday", "mine 06-05"));

        let numeric = detect("hey bot, my birthday is on 3/14", false).unwrap();
        assert_eq!(numeric.args, "mine 03-14");

        let upcoming = detect("when is the next birthday?", false).unwrap();
        assert_eq!(upcoming.args, "upcoming");

        let listed = detect("what birthdays do you know?", false).unwrap();
        assert_eq!(listed.args, "list");
    }
}
