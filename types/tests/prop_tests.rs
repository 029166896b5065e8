use proptest::prelude::*;

use tally_types::{Address, CandidateName, ChainId, Timestamp};

proptest! {
    /// Any 40-hex-digit body parses, and case does not affect equality.
    #[test]
    fn address_parse_case_insensitive(body in "[0-9a-fA-F]{40}") {
        let raw = format!("0x{body}");
        let lower = Address::parse(&raw.to_lowercase()).unwrap();
        let upper = Address::parse(&format!("0x{}", body.to_uppercase())).unwrap();
        prop_assert_eq!(&lower, &upper);
        let parsed = Address::parse(&raw).unwrap();
        prop_assert_eq!(parsed.as_str(), raw.as_str());
    }

    /// Bodies of the wrong length never parse.
    #[test]
    fn address_wrong_length_rejected(body in "[0-9a-f]{0,39}") {
        let raw = format!("0x{body}");
        prop_assert!(Address::parse(&raw).is_err());
    }

    /// Hex and decimal forms of a chain id agree.
    #[test]
    fn chain_id_hex_decimal_agree(id in 0u64..u64::MAX) {
        let chain = ChainId::new(id);
        prop_assert_eq!(ChainId::parse(&chain.to_hex()).unwrap(), chain);
        prop_assert_eq!(ChainId::parse(&id.to_string()).unwrap(), chain);
    }

    /// Names with at least one visible character are accepted verbatim.
    #[test]
    fn candidate_name_with_content_accepted(pad in " {0,3}", core in "[A-Za-z]{1,12}") {
        let raw = format!("{pad}{core}{pad}");
        let name = CandidateName::new(raw.clone()).unwrap();
        prop_assert_eq!(name.as_str(), raw.as_str());
    }

    /// Whitespace-only names are always rejected.
    #[test]
    fn candidate_name_blank_rejected(blank in "[ \t\n]{0,8}") {
        prop_assert!(CandidateName::new(blank).is_err());
    }

    /// Timestamp ordering: new(a) <= new(b) iff a <= b.
    #[test]
    fn timestamp_ordering(a in 0u64..u64::MAX, b in 0u64..u64::MAX) {
        let ta = Timestamp::new(a);
        let tb = Timestamp::new(b);
        prop_assert_eq!(ta <= tb, a <= b);
        prop_assert_eq!(ta == tb, a == b);
    }
}
