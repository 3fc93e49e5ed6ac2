use livechat_domain::ChannelName;
use livechat_protocol::{ChatLine, ParsedEvent, classify_line, parse_line, render_privmsg, split_transmission};
use proptest::prelude::*;

fn chat(raw: &str) -> ChatLine {
	match parse_line(raw) {
		Some(ParsedEvent::Chat(c)) => c,
		other => panic!("expected chat event for {raw:?}, got {other:?}"),
	}
}

#[test]
fn tagged_privmsg_uses_display_name_and_color() {
	let c = chat("@display-name=Alice;color=#FF0000 :alice!alice@alice.tmi.twitch.tv PRIVMSG #zelda :gg wp");
	assert_eq!(c.username, "Alice");
	assert_eq!(c.color.as_deref(), Some("#FF0000"));
	assert_eq!(c.text, "gg wp");
	assert_eq!(c.channel, Some(ChannelName::new("zelda").unwrap()));
}

#[test]
fn without_display_name_falls_back_to_prefix_login() {
	let c = chat("@color=#FF0000 :alice!alice@alice.tmi.twitch.tv PRIVMSG #zelda :gg wp");
	assert_eq!(c.username, "alice");
	assert_eq!(c.color.as_deref(), Some("#FF0000"));
}

#[test]
fn without_tags_or_prefix_is_unknown() {
	let c = chat("PRIVMSG #zelda :gg wp");
	assert_eq!(c.username, "unknown");
	assert_eq!(c.color, None);
	assert_eq!(c.text, "gg wp");
}

#[test]
fn privmsg_without_separator_yields_no_event() {
	assert_eq!(parse_line(":alice!alice@alice.tmi.twitch.tv PRIVMSG #zelda gg"), None);
	assert!(classify_line(":alice!alice@alice.tmi.twitch.tv PRIVMSG #zelda gg").is_err());
}

#[test]
fn empty_body_is_kept() {
	let c = chat(":alice!alice@alice PRIVMSG #zelda :");
	assert_eq!(c.text, "");
}

#[test]
fn bundled_transmission_classifies_each_line_in_order() {
	let raw = "PING :tmi.twitch.tv\r\n:tmi.twitch.tv 001 me :Welcome\r\n\r\n:me!me@me JOIN #zelda\r\n:a!a@a PRIVMSG #zelda :hi\r\n";
	let events: Vec<ParsedEvent> = split_transmission(raw).filter_map(parse_line).collect();
	assert_eq!(events.len(), 4);
	assert_eq!(events[0], ParsedEvent::Ping);
	assert_eq!(events[1], ParsedEvent::AuthAck);
	assert!(matches!(events[2], ParsedEvent::JoinAck { .. }));
	assert!(matches!(&events[3], ParsedEvent::Chat(c) if c.text == "hi"));
}

proptest! {
	#[test]
	fn any_ping_line_is_a_ping(rest in "[ -~]{0,40}") {
		let raw = format!("PING {rest}");
		prop_assert_eq!(parse_line(&raw), Some(ParsedEvent::Ping));
	}

	#[test]
	fn rendered_privmsg_parses_back_to_its_text(text in "[a-zA-Z0-9 :!?#@;=]{0,60}", channel in "[a-z0-9_]{1,25}") {
		let channel = ChannelName::new(&channel).unwrap();
		let line = format!(":me!me@me {}", render_privmsg(&channel, &text));
		let c = chat(&line);
		prop_assert_eq!(c.text, text);
		prop_assert_eq!(c.username, "me");
		prop_assert_eq!(c.channel, Some(channel));
	}

	#[test]
	fn split_never_yields_empty_or_delimited_segments(parts in proptest::collection::vec("[a-zA-Z :#]{0,12}", 0..8)) {
		let raw = parts.join("\r\n");
		for line in split_transmission(&raw) {
			prop_assert!(!line.is_empty());
			prop_assert!(!line.contains("\r\n"));
		}
		let expected: Vec<&str> = parts.iter().map(String::as_str).filter(|p| !p.is_empty()).collect();
		let actual: Vec<&str> = split_transmission(&raw).collect();
		prop_assert_eq!(actual, expected);
	}
}
