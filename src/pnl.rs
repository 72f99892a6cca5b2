//! Per-user PnL accounting.
//!
//! Tracks a signed position with its volume-weighted open price. Fills
//! against the position realize PnL; the open remainder is marked to the
//! last reference mid. The engine thread owns every instance, so there is
//! no interior locking. All arithmetic is plain f64 - the figures are a
//! running estimate, not a ledger.

use crate::messages::PnlUpdate;

pub struct PnlEngine {
    user_id: u64,
    position: f64,
    avg_price: f64,
    realized: f64,
    unrealized: f64,
    last_mid: f64,
}

impl PnlEngine {
    pub fn new(user_id: u64) -> Self {
        Self {
            user_id,
            position: 0.0,
            avg_price: 0.0,
            realized: 0.0,
            unrealized: 0.0,
            last_mid: 0.0,
        }
    }

    pub fn user_id(&self) -> u64 {
        self.user_id
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    /// Apply a fill for this user. `user_is_buy` is this user's side of the
    /// trade. Closing quantity (opposite sign to the position) realizes PnL
    /// against the open VWAP; any remainder opens or grows the position.
    pub fn on_trade(&mut self, user_is_buy: bool, price: f64, quantity: u64) {
        let mut signed = if user_is_buy {
            quantity as f64
        } else {
            -(quantity as f64)
        };

        if self.position != 0.0 && self.position * signed < 0.0 {
            let close = self.position.abs().min(signed.abs());
            if self.position > 0.0 {
                self.realized += (price - self.avg_price) * close;
            } else {
                self.realized += (self.avg_price - price) * close;
            }
            signed = if signed.abs() > close {
                if signed > 0.0 {
                    signed - close
                } else {
                    signed + close
                }
            } else {
                0.0
            };
            if self.position.abs() <= close {
                self.position = 0.0;
                self.avg_price = 0.0;
            } else if self.position > 0.0 {
                self.position -= close;
            } else {
                self.position += close;
            }
        }

        if signed != 0.0 {
            if self.position == 0.0 {
                self.avg_price = price;
                self.position = signed;
            } else {
                // Same sign as the position after closing: grow at new VWAP.
                let new_pos = self.position + signed;
                self.avg_price =
                    (self.avg_price * self.position.abs() + price * signed.abs()) / new_pos.abs();
                self.position = new_pos;
            }
        }

        if self.last_mid > 0.0 {
            self.remark();
        }
    }

    /// Update the reference mid and remark the open position.
    pub fn on_midprice(&mut self, mid: f64) {
        self.last_mid = mid;
        self.remark();
    }

    fn remark(&mut self) {
        if self.position == 0.0 {
            self.unrealized = 0.0;
        } else if self.position > 0.0 {
            self.unrealized = (self.last_mid - self.avg_price) * self.position.abs();
        } else {
            self.unrealized = (self.avg_price - self.last_mid) * self.position.abs();
        }
    }

    pub fn snapshot(&self) -> PnlUpdate {
        PnlUpdate {
            user_id: self.user_id as u32,
            realized: self.realized,
            unrealized: self.unrealized,
            position: self.position,
            avg_price: self.avg_price,
            equity: self.realized + self.unrealized,
        }
    }
}
