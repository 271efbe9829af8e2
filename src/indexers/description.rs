//! Last-resort parsing of the human-readable `description` field.
//!
//! Some deliveries carry no typed NFT event, only a sentence such as
//! `"7xKX placed a bid of 1.5 SOL for 9aB3 on MAGIC_EDEN"`. These helpers
//! recognize the intent and pull out whatever fields the sentence holds.

/// Marketplace action a description talks about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescribedAction {
    Bid,
    BidCancelled,
    Listing,
    Sale,
    ListingCancelled,
}

/// Fields recovered from a description.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DescribedEvent {
    /// First word, the account that acted.
    pub actor: Option<String>,
    pub amount: Option<f64>,
    pub currency: Option<String>,
    /// Word after `for` (bids) or after the verb (listings / sales).
    pub mint: Option<String>,
    /// Word after `from` in sale sentences.
    pub counterparty: Option<String>,
    /// Word after `on`.
    pub marketplace: Option<String>,
}

fn words(description: &str) -> Vec<&str> {
    description
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| matches!(c, ',' | '.' | '!' | '(' | ')')))
        .filter(|w| !w.is_empty())
        .collect()
}

fn has_word(words: &[&str], wanted: &str) -> bool {
    words.iter().any(|w| w.eq_ignore_ascii_case(wanted))
}

fn word_after(words: &[&str], marker: &str) -> Option<String> {
    let pos = words.iter().position(|w| w.eq_ignore_ascii_case(marker))?;
    words.get(pos + 1).map(|w| (*w).to_string())
}

/// Classifies a description for the bid indexer: it must mention both
/// "bid" and "for".
#[must_use]
pub fn bid_action(description: &str) -> Option<DescribedAction> {
    let w = words(description);
    let mentions_bid = w
        .iter()
        .any(|x| x.eq_ignore_ascii_case("bid") || x.eq_ignore_ascii_case("bids"));
    if !mentions_bid || !has_word(&w, "for") {
        return None;
    }
    if w.iter()
        .any(|x| x.to_ascii_lowercase().starts_with("cancel"))
    {
        Some(DescribedAction::BidCancelled)
    } else {
        Some(DescribedAction::Bid)
    }
}

/// Classifies a description for the listing indexer.
#[must_use]
pub fn listing_action(description: &str) -> Option<DescribedAction> {
    let w: Vec<String> = words(description)
        .into_iter()
        .map(str::to_ascii_lowercase)
        .collect();
    let has = |needle: &str| w.iter().any(|x| x == needle);

    if w.iter().any(|x| x.starts_with("cancel")) && (has("listing") || has("listed")) {
        Some(DescribedAction::ListingCancelled)
    } else if has("sold") || has("bought") {
        Some(DescribedAction::Sale)
    } else if has("listed") {
        Some(DescribedAction::Listing)
    } else {
        None
    }
}

/// Extracts actor, amount, currency, mint and marketplace from a sentence.
#[must_use]
pub fn parse(description: &str) -> DescribedEvent {
    let w = words(description);

    let amount_pos = w.iter().position(|x| x.parse::<f64>().is_ok());
    let amount = amount_pos.and_then(|p| w[p].parse::<f64>().ok());
    let currency = amount_pos
        .and_then(|p| w.get(p + 1))
        .filter(|c| c.chars().all(|ch| ch.is_ascii_alphabetic()) && c.len() <= 8)
        .filter(|c| !c.eq_ignore_ascii_case("for") && !c.eq_ignore_ascii_case("on"))
        .map(|c| c.to_ascii_uppercase());

    // Bids name the NFT after "for"; listings and sales right after the verb.
    let mint = if has_word(&w, "bid") {
        word_after(&w, "for")
    } else {
        ["listed", "sold", "bought", "cancelled", "canceled"]
            .iter()
            .find_map(|verb| word_after(&w, verb))
            .filter(|m| m.parse::<f64>().is_err() && !m.eq_ignore_ascii_case("listing"))
            .or_else(|| word_after(&w, "listing"))
    };

    DescribedEvent {
        actor: w.first().map(|s| (*s).to_string()),
        amount,
        currency,
        mint,
        counterparty: word_after(&w, "from"),
        marketplace: word_after(&w, "on"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bid_description() {
        let d = "7xKXbidder placed a bid of 1.5 SOL for 9aB3mint on MAGIC_EDEN.";
        assert_eq!(bid_action(d), Some(DescribedAction::Bid));
        let parsed = parse(d);
        assert_eq!(parsed.actor.as_deref(), Some("7xKXbidder"));
        assert_eq!(parsed.amount, Some(1.5));
        assert_eq!(parsed.currency.as_deref(), Some("SOL"));
        assert_eq!(parsed.mint.as_deref(), Some("9aB3mint"));
        assert_eq!(parsed.marketplace.as_deref(), Some("MAGIC_EDEN"));
    }

    #[test]
    fn test_bid_requires_both_words() {
        assert_eq!(bid_action("someone placed a bid"), None);
        assert_eq!(bid_action("transfer for 2 SOL"), None);
        assert_eq!(
            bid_action("bidder cancelled a bid for mint1"),
            Some(DescribedAction::BidCancelled)
        );
    }

    #[test]
    fn test_listing_descriptions() {
        let listed = "seller1 listed mint1 for 12 SOL on TENSOR";
        assert_eq!(listing_action(listed), Some(DescribedAction::Listing));
        let p = parse(listed);
        assert_eq!(p.mint.as_deref(), Some("mint1"));
        assert_eq!(p.amount, Some(12.0));

        let sold = "buyer1 bought mint1 from seller1 for 12 SOL on TENSOR";
        assert_eq!(listing_action(sold), Some(DescribedAction::Sale));
        let p = parse(sold);
        assert_eq!(p.counterparty.as_deref(), Some("seller1"));
        assert_eq!(p.mint.as_deref(), Some("mint1"));

        assert_eq!(
            listing_action("seller1 cancelled listing mint1 on TENSOR"),
            Some(DescribedAction::ListingCancelled)
        );
        assert_eq!(listing_action("swap 1 SOL for 100 USDC"), None);
    }
}
