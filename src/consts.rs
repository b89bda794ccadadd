//
// Copyright (c) 2020-2022 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

/// Dead-letter exchange suffix appended to a queue's own exchange name, declared via
/// the broker's `x-dead-letter-exchange` argument.
pub const DEAD_LETTER_EXCHANGE_SUFFIX: &str = ".dlx";

/// Header the bus stamps on every republish so handlers and the dead-letter path can
/// tell how many delivery attempts a message has already seen.
pub const DELIVERY_ATTEMPT_HEADER: &str = "x-delivery-attempt";

/// Envelope field every bus message carries regardless of stage.
pub const ENVELOPE_TYPE_FIELD: &str = "type";
