//
// Copyright (c) 2020-2022 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

pub mod connection;
pub mod interface;
pub mod models;
pub mod tenant_scope;

pub use connection::DbPools;
pub use connection::PgPool;
pub use tenant_scope::assert_tenant_filtered;
pub use tenant_scope::TenantId;
