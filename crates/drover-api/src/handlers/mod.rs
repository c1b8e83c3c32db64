// SPDX-License-Identifier: GPL-3.0-or-later
pub mod jobs;
pub mod queues;
