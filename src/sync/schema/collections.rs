use super::{CollectionKind, CollectionRole, CollectionSchema};

fn private(name: &str, api_method: &str, date_field: &str) -> CollectionSchema {
    CollectionSchema::new(name, api_method, CollectionKind::PRIVATE_APPEND_ONLY)
        .with_fields(&["id", date_field])
        .with_date_field(date_field)
        .with_unique_key(&["id", "user_id"])
}

fn public_snapshot(name: &str, api_method: &str, key: &str) -> CollectionSchema {
    CollectionSchema::new(name, api_method, CollectionKind::PUBLIC_SNAPSHOT)
        .with_fields(&[key])
        .with_unique_key(&[key])
        .with_max_limit(10_000)
}

pub(super) fn standard_collections() -> Vec<CollectionSchema> {
    vec![
        private("ledgers", "getLedgers", "mts")
            .with_role(CollectionRole::Ledgers)
            .with_fields(&[
                "currency",
                "amount",
                "amountUsd",
                "balance",
                "balanceUsd",
                "_nativeBalance",
                "_nativeBalanceUsd",
                "description",
                "wallet",
                "_isBalanceRecalced",
            ])
            .with_derived_copy("balance", "_nativeBalance")
            .with_max_limit(2_500),
        private("trades", "getTrades", "mtsCreate")
            .with_fields(&[
                "symbol",
                "orderID",
                "execAmount",
                "execPrice",
                "orderType",
                "orderPrice",
                "maker",
                "fee",
                "feeCurrency",
            ])
            .with_max_limit(2_500),
        private("fundingTrades", "getFundingTrades", "mtsCreate")
            .with_fields(&["symbol", "offerID", "amount", "rate", "period", "maker"])
            .with_max_limit(1_000),
        private("fundingOfferHistory", "getFundingOfferHistory", "mtsUpdate")
            .with_fields(&[
                "symbol",
                "mtsCreate",
                "amount",
                "amountOrig",
                "type",
                "flags",
                "status",
                "rate",
                "period",
            ])
            .with_max_limit(500),
        private("fundingLoanHistory", "getFundingLoanHistory", "mtsUpdate")
            .with_fields(&[
                "symbol",
                "side",
                "mtsCreate",
                "amount",
                "flags",
                "status",
                "rate",
                "period",
                "mtsOpening",
                "mtsLastPayout",
            ])
            .with_max_limit(500),
        private("fundingCreditHistory", "getFundingCreditHistory", "mtsUpdate")
            .with_fields(&[
                "symbol",
                "side",
                "mtsCreate",
                "amount",
                "flags",
                "status",
                "rate",
                "period",
                "mtsOpening",
                "mtsLastPayout",
                "positionPair",
            ])
            .with_max_limit(500),
        private("movements", "getMovements", "mtsUpdated")
            .with_role(CollectionRole::Movements)
            .with_fields(&[
                "currency",
                "currencyName",
                "mtsStarted",
                "status",
                "amount",
                "amountUsd",
                "fees",
                "feesUsd",
                "destinationAddress",
                "transactionId",
            ])
            .with_max_limit(1_000),
        private("orders", "getOrders", "mtsUpdate")
            .with_fields(&[
                "gid",
                "cid",
                "symbol",
                "mtsCreate",
                "amount",
                "amountOrig",
                "type",
                "status",
                "price",
                "priceAvg",
            ])
            .with_max_limit(2_500),
        private("positionsHistory", "getPositionsHistory", "mtsUpdate")
            .with_fields(&[
                "symbol",
                "status",
                "amount",
                "basePrice",
                "marginFunding",
                "pl",
                "plPerc",
                "liquidationPrice",
                "leverage",
                "mtsCreate",
            ])
            .with_max_limit(500),
        private("logins", "getLogins", "time")
            .with_fields(&["ip", "extraData"])
            .with_max_limit(250),
        CollectionSchema::new("changeLogs", "getChangeLogs", CollectionKind::PRIVATE_APPEND_ONLY)
            .with_fields(&["mtsCreate", "log", "ip", "userAgent"])
            .with_date_field("mtsCreate")
            .with_unique_key(&["mtsCreate", "log", "user_id"])
            .with_max_limit(500),
        CollectionSchema::new("publicTrades", "getPublicTrades", CollectionKind::PUBLIC_APPEND_ONLY)
            .with_role(CollectionRole::PublicTrades)
            .with_fields(&["id", "mts", "amount", "price", "_symbol"])
            .with_date_field("mts")
            .with_symbol_field("_symbol")
            .with_unique_key(&["id", "_symbol"])
            .with_max_limit(5_000),
        CollectionSchema::new(
            "tickersHistory",
            "getTickersHistory",
            CollectionKind::PUBLIC_APPEND_ONLY,
        )
        .with_role(CollectionRole::TickersHistory)
        .with_fields(&["symbol", "bid", "ask", "mtsUpdate"])
        .with_date_field("mtsUpdate")
        .with_symbol_field("symbol")
        .with_unique_key(&["mtsUpdate", "symbol"])
        .with_max_limit(250),
        CollectionSchema::new("candles", "getCandles", CollectionKind::PUBLIC_APPEND_ONLY)
            .with_role(CollectionRole::Candles)
            .with_fields(&[
                "mts",
                "open",
                "close",
                "high",
                "low",
                "volume",
                "_symbol",
                "_timeframe",
            ])
            .with_date_field("mts")
            .with_symbol_field("_symbol")
            .with_timeframe_field("_timeframe")
            .with_unique_key(&["mts", "_symbol", "_timeframe"])
            .with_max_limit(10_000),
        public_snapshot("symbols", "getSymbols", "pairs"),
        public_snapshot("futures", "getFutures", "pairs"),
        public_snapshot("currencies", "getCurrencies", "id")
            .with_fields(&["name", "pool", "explorer", "symbol", "walletFx"]),
        public_snapshot("inactiveSymbols", "getInactiveSymbols", "pairs"),
        public_snapshot("marginCurrencyList", "getMarginCurrencyList", "symbol"),
        CollectionSchema::new(
            "positionsSnapshot",
            "getPositionsSnapshot",
            CollectionKind::HIDDEN_SNAPSHOT,
        )
        .with_fields(&[
            "id",
            "symbol",
            "status",
            "amount",
            "basePrice",
            "pl",
            "mtsCreate",
            "mtsUpdate",
        ])
        .with_unique_key(&["id", "user_id"]),
    ]
}
