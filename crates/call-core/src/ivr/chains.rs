//! Pharmacy chain knowledge registry.
//!
//! Each profile captures what is known about a chain's phone tree: the
//! prompt/action pairs the AI agent should follow, phrases that indicate
//! hold music or a live person, a rough hold-time estimate and free-form
//! tips. Profiles feed two consumers: [`navigation_instructions`] renders
//! the script the AI session is configured with, and the indicator lists
//! give the bridge a local cross-check on provider-reported signals.

/// Known pharmacy chains. `Independent` is the generic fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PharmacyChain {
    Cvs,
    Walgreens,
    Walmart,
    RiteAid,
    Costco,
    Kroger,
    Independent,
}

/// One prompt/action pair in a chain's phone tree.
#[derive(Debug, Clone, Copy)]
pub struct MenuStep {
    /// Prompt fragment to listen for, lowercase.
    pub prompt: &'static str,
    /// What the agent should do when it hears the prompt.
    pub action: &'static str,
}

/// Navigation knowledge for one chain.
#[derive(Debug, Clone, Copy)]
pub struct ChainProfile {
    pub chain: PharmacyChain,
    pub display: &'static str,
    pub menu_patterns: &'static [MenuStep],
    /// Phrases and sounds that indicate the call is parked on hold.
    pub hold_indicators: &'static [&'static str],
    /// Phrases that indicate a live person picked up.
    pub human_indicators: &'static [&'static str],
    pub estimated_hold_secs: u32,
    pub tips: &'static [&'static str],
}

const GENERIC_HOLD_INDICATORS: &[&str] = &[
    "please hold",
    "your call is important",
    "next available",
    "please stay on the line",
    "hold music",
];

const GENERIC_HUMAN_INDICATORS: &[&str] = &[
    "this is",
    "how can i help",
    "how may i help",
    "pharmacy, can i help you",
    "speaking",
];

static PROFILES: &[ChainProfile] = &[
    ChainProfile {
        chain: PharmacyChain::Cvs,
        display: "CVS",
        menu_patterns: &[
            MenuStep { prompt: "if you are a patient", action: "press 1" },
            MenuStep { prompt: "to speak to the pharmacy", action: "press 3" },
            MenuStep { prompt: "to speak with a pharmacy team member", action: "press 0" },
        ],
        hold_indicators: GENERIC_HOLD_INDICATORS,
        human_indicators: &["thank you for calling cvs", "this is", "how can i help"],
        estimated_hold_secs: 240,
        tips: &["Automated refill prompts come first; wait for the staff option."],
    },
    ChainProfile {
        chain: PharmacyChain::Walgreens,
        display: "Walgreens",
        menu_patterns: &[
            MenuStep { prompt: "para espanol", action: "wait" },
            MenuStep { prompt: "for the pharmacy", action: "press 1" },
            MenuStep { prompt: "to speak with a pharmacy staff member", action: "press 0" },
        ],
        hold_indicators: GENERIC_HOLD_INDICATORS,
        human_indicators: &["thank you for calling walgreens", "this is", "how can i help"],
        estimated_hold_secs: 180,
        tips: &["Pressing 0 repeatedly escalates to staff at most stores."],
    },
    ChainProfile {
        chain: PharmacyChain::Walmart,
        display: "Walmart Pharmacy",
        menu_patterns: &[
            MenuStep { prompt: "thank you for calling walmart", action: "wait" },
            MenuStep { prompt: "for the pharmacy", action: "press 2" },
            MenuStep { prompt: "to speak with someone in the pharmacy", action: "press 0" },
        ],
        hold_indicators: GENERIC_HOLD_INDICATORS,
        human_indicators: &["walmart pharmacy", "this is", "how can i help"],
        estimated_hold_secs: 300,
        tips: &["Store switchboard answers first; ask for the pharmacy department."],
    },
    ChainProfile {
        chain: PharmacyChain::RiteAid,
        display: "Rite Aid",
        menu_patterns: &[
            MenuStep { prompt: "to reach the pharmacy", action: "press 1" },
            MenuStep { prompt: "to speak to pharmacy staff", action: "press 0" },
        ],
        hold_indicators: GENERIC_HOLD_INDICATORS,
        human_indicators: &["thank you for calling rite aid", "this is", "how can i help"],
        estimated_hold_secs: 180,
        tips: &[],
    },
    ChainProfile {
        chain: PharmacyChain::Costco,
        display: "Costco Pharmacy",
        menu_patterns: &[
            MenuStep { prompt: "for the pharmacy", action: "press 3" },
            MenuStep { prompt: "to speak with pharmacy staff", action: "press 0" },
        ],
        hold_indicators: GENERIC_HOLD_INDICATORS,
        human_indicators: &["costco pharmacy", "this is", "how can i help"],
        estimated_hold_secs: 120,
        tips: &["Pharmacy picks up directly outside peak hours."],
    },
    ChainProfile {
        chain: PharmacyChain::Kroger,
        display: "Kroger Pharmacy",
        menu_patterns: &[
            MenuStep { prompt: "for the pharmacy", action: "press 4" },
            MenuStep { prompt: "to speak with a pharmacy associate", action: "press 0" },
        ],
        hold_indicators: GENERIC_HOLD_INDICATORS,
        human_indicators: &["kroger pharmacy", "this is", "how can i help"],
        estimated_hold_secs: 180,
        tips: &[],
    },
];

static GENERIC_PROFILE: ChainProfile = ChainProfile {
    chain: PharmacyChain::Independent,
    display: "Independent",
    menu_patterns: &[
        MenuStep { prompt: "for the pharmacy", action: "press the announced digit" },
        MenuStep { prompt: "to speak with", action: "press 0" },
    ],
    hold_indicators: GENERIC_HOLD_INDICATORS,
    human_indicators: GENERIC_HUMAN_INDICATORS,
    estimated_hold_secs: 120,
    tips: &["Independent pharmacies often answer directly without a menu."],
};

fn chain_needle(chain: PharmacyChain) -> &'static str {
    match chain {
        PharmacyChain::Cvs => "cvs",
        PharmacyChain::Walgreens => "walgreens",
        PharmacyChain::Walmart => "walmart",
        PharmacyChain::RiteAid => "rite aid",
        PharmacyChain::Costco => "costco",
        PharmacyChain::Kroger => "kroger",
        PharmacyChain::Independent => "",
    }
}

/// Match a pharmacy display name to a chain profile.
///
/// Case-insensitive substring match; unmatched names get the generic
/// fallback profile.
pub fn detect_chain(pharmacy_name: &str) -> &'static ChainProfile {
    let lowered = pharmacy_name.to_lowercase();
    PROFILES
        .iter()
        .find(|p| lowered.contains(chain_needle(p.chain)))
        .unwrap_or(&GENERIC_PROFILE)
}

/// Render the navigation instructions the AI voice agent is configured
/// with before the call's first audio frame.
pub fn navigation_instructions(profile: &ChainProfile, pharmacy_name: &str) -> String {
    let mut out = format!(
        "You are calling {} on behalf of a patient to check medication availability. \
         Navigate the phone menu until you reach a pharmacy staff member.\n",
        pharmacy_name
    );

    out.push_str("Menu guidance:\n");
    for step in profile.menu_patterns {
        out.push_str(&format!("- When you hear \"{}\": {}.\n", step.prompt, step.action));
    }

    out.push_str(&format!(
        "If placed on hold, stay on the line; typical hold time is about {} minutes.\n",
        (profile.estimated_hold_secs + 59) / 60
    ));

    for tip in profile.tips {
        out.push_str(&format!("Note: {}\n", tip));
    }

    out.push_str(
        "Announce [HUMAN_REACHED] the moment a live person answers, \
         [VOICEMAIL_REACHED] if the call goes to voicemail, and \
         [NAV_FAILED] if you cannot get through the menu.",
    );
    out
}

/// Whether transcript text matches one of the profile's hold indicators.
pub fn matches_hold_indicator(profile: &ChainProfile, text: &str) -> bool {
    let lowered = text.to_lowercase();
    profile.hold_indicators.iter().any(|ind| lowered.contains(ind))
}

/// Whether transcript text matches one of the profile's human-speech
/// indicators.
pub fn matches_human_indicator(profile: &ChainProfile, text: &str) -> bool {
    let lowered = text.to_lowercase();
    profile.human_indicators.iter().any(|ind| lowered.contains(ind))
}
