#![forbid(unsafe_code)]

use std::collections::VecDeque;

use livechat_domain::ChatMessage;

/// Most recent messages, oldest first; older entries are evicted past `max_items`.
#[derive(Debug, Clone)]
pub struct ChatHistory {
	items: VecDeque<ChatMessage>,
	max_items: usize,
}

impl ChatHistory {
	pub fn new(max_items: usize) -> Self {
		let max_items = max_items.max(1);
		Self {
			items: VecDeque::with_capacity(max_items.min(1024)),
			max_items,
		}
	}

	pub fn push(&mut self, msg: ChatMessage) {
		self.items.push_back(msg);
		while self.items.len() > self.max_items {
			self.items.pop_front();
		}
	}

	pub fn len(&self) -> usize {
		self.items.len()
	}

	/// Up to `n` newest messages, oldest first.
	pub fn tail(&self, n: usize) -> impl Iterator<Item = &ChatMessage> {
		self.items.iter().skip(self.items.len().saturating_sub(n))
	}
}
